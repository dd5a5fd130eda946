//! Bundled toolchain and executable discovery

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{LaunchError, Result};

/// A resolved language server installation
#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    /// Root of the bundled runtime (e.g. the SDK directory)
    pub root: PathBuf,
    /// The runtime's binary directory, to be prepended to `PATH`
    pub bin_dir: PathBuf,
    /// The language server executable at the installation root
    pub server_executable: PathBuf,
}

/// Resolves an installation path into a [`Toolchain`].
///
/// Injected into launchers so discovery has no global state and tests can
/// substitute fixed layouts.
pub trait ToolchainLocator: Send + Sync {
    fn locate(&self, install_path: &Path) -> Result<Toolchain>;
}

/// Locates toolchains on disk with a glob-style directory search.
///
/// The toolchain is the first directory matching `toolchain_glob` under the
/// installation path that contains a `bin` subdirectory; the server
/// executable is `<server_name>` (`.exe` on Windows) at the installation
/// root.
pub struct FsToolchainLocator {
    server_name: String,
    toolchain_glob: String,
}

impl FsToolchainLocator {
    pub fn new(server_name: impl Into<String>, toolchain_glob: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            toolchain_glob: toolchain_glob.into(),
        }
    }

    fn find_toolchain_root(&self, install_path: &Path) -> Result<PathBuf> {
        let pattern = install_path
            .join(&self.toolchain_glob)
            .to_string_lossy()
            .into_owned();

        let entries = glob::glob(&pattern).map_err(|err| {
            LaunchError::Config(format!("invalid toolchain pattern '{}': {}", pattern, err))
        })?;

        for entry in entries {
            match entry {
                Ok(candidate) if candidate.is_dir() && candidate.join("bin").is_dir() => {
                    debug!(root = %candidate.display(), "found bundled toolchain");
                    return Ok(candidate);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "skipping unreadable toolchain candidate");
                }
            }
        }

        Err(LaunchError::ToolchainNotFound {
            install_path: install_path.to_path_buf(),
        })
    }

    fn find_server_executable(&self, install_path: &Path) -> Result<PathBuf> {
        let executable = platform_executable_name(&self.server_name);
        let candidate = install_path.join(&executable);
        if candidate.is_file() {
            debug!(executable = %candidate.display(), "found language server executable");
            return Ok(candidate);
        }

        Err(LaunchError::ExecutableNotFound {
            executable,
            install_path: install_path.to_path_buf(),
        })
    }
}

impl ToolchainLocator for FsToolchainLocator {
    fn locate(&self, install_path: &Path) -> Result<Toolchain> {
        let root = self.find_toolchain_root(install_path)?;
        let server_executable = self.find_server_executable(install_path)?;
        let bin_dir = root.join("bin");

        Ok(Toolchain {
            root,
            bin_dir,
            server_executable,
        })
    }
}

fn platform_executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_install(with_toolchain: bool, with_executable: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if with_toolchain {
            fs::create_dir_all(dir.path().join("sdk/go/bin")).unwrap();
        }
        if with_executable {
            fs::write(
                dir.path().join(platform_executable_name("go-langserver")),
                b"",
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn test_locate_complete_install() {
        let dir = fake_install(true, true);
        let locator = FsToolchainLocator::new("go-langserver", "sdk/*");

        let toolchain = locator.locate(dir.path()).unwrap();
        assert_eq!(toolchain.root, dir.path().join("sdk/go"));
        assert_eq!(toolchain.bin_dir, dir.path().join("sdk/go/bin"));
        assert!(toolchain
            .server_executable
            .to_string_lossy()
            .contains("go-langserver"));
    }

    #[test]
    fn test_missing_toolchain_directory() {
        let dir = fake_install(false, true);
        let locator = FsToolchainLocator::new("go-langserver", "sdk/*");

        let err = locator.locate(dir.path()).unwrap_err();
        assert!(matches!(err, LaunchError::ToolchainNotFound { .. }));
    }

    #[test]
    fn test_missing_executable() {
        let dir = fake_install(true, false);
        let locator = FsToolchainLocator::new("go-langserver", "sdk/*");

        let err = locator.locate(dir.path()).unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_toolchain_needs_bin_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        // sdk/go exists but has no bin directory
        fs::create_dir_all(dir.path().join("sdk/go")).unwrap();
        fs::write(
            dir.path().join(platform_executable_name("go-langserver")),
            b"",
        )
        .unwrap();
        let locator = FsToolchainLocator::new("go-langserver", "sdk/*");

        let err = locator.locate(dir.path()).unwrap_err();
        assert!(matches!(err, LaunchError::ToolchainNotFound { .. }));
    }

    #[test]
    fn test_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sdk/a/bin")).unwrap();
        fs::create_dir_all(dir.path().join("sdk/b/bin")).unwrap();
        fs::write(
            dir.path().join(platform_executable_name("go-langserver")),
            b"",
        )
        .unwrap();
        let locator = FsToolchainLocator::new("go-langserver", "sdk/*");

        let toolchain = locator.locate(dir.path()).unwrap();
        assert_eq!(toolchain.root, dir.path().join("sdk/a"));
    }
}
