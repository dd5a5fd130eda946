//! Go language server launcher

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::LanguageLauncher;
use crate::config::LauncherSettings;
use crate::error::{LaunchError, Result};
use crate::logging::LogSink;
use crate::process::ExternalProgram;
use crate::toolchain::{FsToolchainLocator, Toolchain, ToolchainLocator};
use crate::types::ServerOptions;

/// Fixed port for attaching to an externally managed Go server
pub const GO_WELL_KNOWN_PORT: u16 = 2091;

const SERVER_NAME: &str = "go-langserver";
const TOOLCHAIN_GLOB: &str = "sdk/*";

/// Launches the bundled Go language server.
///
/// The installation ships a Go SDK under `sdk/` and the server binary at the
/// installation root; the spawned process gets `GOROOT` pointed at the SDK,
/// a `GOPATH` under the cache directory, and the SDK's `bin` directory (plus
/// a bundled `git`, when present) on its `PATH`.
pub struct GoLauncher {
    options: ServerOptions,
    locator: Arc<dyn ToolchainLocator>,
}

impl std::fmt::Debug for GoLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoLauncher")
            .field("options", &self.options)
            .field("locator", &"<dyn ToolchainLocator>")
            .finish()
    }
}

impl GoLauncher {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            locator: Arc::new(FsToolchainLocator::new(SERVER_NAME, TOOLCHAIN_GLOB)),
        }
    }

    /// Use a custom toolchain locator (tests, packaged layouts)
    pub fn with_locator(options: ServerOptions, locator: Arc<dyn ToolchainLocator>) -> Self {
        Self { options, locator }
    }

    /// Construct from the `go` entry of loaded launcher settings
    pub fn from_settings(settings: &LauncherSettings) -> Result<Self> {
        let options = settings
            .languages
            .get("go")
            .cloned()
            .ok_or_else(|| LaunchError::Config("no 'go' language server configured".to_string()))?;
        Ok(Self::new(options))
    }

    fn gopath(&self) -> PathBuf {
        self.options.cache_dir.join("go")
    }

    fn listen_host(&self) -> &'static str {
        if self.options.allow_remote {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    /// Environment for the spawned server process
    pub fn build_environment(&self, toolchain: &Toolchain, port: u16) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("GOROOT".to_string(), toolchain.root.display().to_string());
        env.insert("GOPATH".to_string(), self.gopath().display().to_string());
        env.insert("CGO_ENABLED".to_string(), "0".to_string());
        env.insert("CLIENT_HOST".to_string(), "127.0.0.1".to_string());
        env.insert("CLIENT_PORT".to_string(), port.to_string());

        let mut paths = vec![toolchain.bin_dir.clone()];
        if let Some(git_dir) = bundled_git_dir(&self.options.install_path) {
            debug!(dir = %git_dir.display(), "bundled git found");
            paths.push(git_dir);
        }
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        if let Ok(joined) = std::env::join_paths(paths) {
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }

        env
    }
}

#[async_trait]
impl LanguageLauncher for GoLauncher {
    fn language(&self) -> &str {
        "go"
    }

    fn options(&self) -> &ServerOptions {
        &self.options
    }

    fn well_known_port(&self) -> u16 {
        GO_WELL_KNOWN_PORT
    }

    fn initialize_options(&self) -> Value {
        json!({
            "installGoDependency": false,
        })
    }

    async fn spawn_process(&self, port: u16, log: Arc<dyn LogSink>) -> Result<ExternalProgram> {
        let toolchain = self.locator.locate(&self.options.install_path)?;

        // Shared across launches for the same cache configuration; another
        // process may have created it already.
        tokio::fs::create_dir_all(self.gopath()).await?;

        let env = self.build_environment(&toolchain, port);
        let args = vec![
            "-host".to_string(),
            self.listen_host().to_string(),
            "-port".to_string(),
            port.to_string(),
        ];

        ExternalProgram::spawn(
            self.language(),
            &toolchain.server_executable,
            &args,
            env,
            log,
        )
        .await
    }
}

fn bundled_git_dir(install_path: &std::path::Path) -> Option<PathBuf> {
    let candidate = install_path.join("tools").join("git").join("bin");
    candidate.is_dir().then_some(candidate)
}
