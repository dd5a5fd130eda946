//! Core data structures for language server launching

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for one language server installation.
///
/// Owned by the caller and read-only to the launcher; every launch of the
/// same language shares one `ServerOptions` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Root of the on-disk installation (bundled toolchain + server binary)
    pub install_path: PathBuf,
    /// Directory for server-side caches, created on demand
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Attach to an externally managed server on a well-known port instead
    /// of spawning one
    #[serde(default)]
    pub detach: bool,
    /// Let the spawned server accept connections from other hosts
    #[serde(default)]
    pub allow_remote: bool,
    /// Maximum number of concurrent workspace roots routed to one server
    #[serde(default = "default_max_workspaces")]
    pub max_workspaces: usize,
    /// Whether the server multiplexes workspace roots natively, lifting the
    /// workspace cap
    #[serde(default)]
    pub builtin_workspace: bool,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Socket connection attempts before the launch is abandoned
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Respawn attempts allowed after unexpected exits
    #[serde(default = "default_max_respawns")]
    pub max_respawns: u32,
}

impl ServerOptions {
    /// Options for a given installation path, everything else defaulted
    pub fn for_install(install_path: impl Into<PathBuf>) -> Self {
        Self {
            install_path: install_path.into(),
            ..Self::default()
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            install_path: PathBuf::new(),
            cache_dir: default_cache_dir(),
            detach: false,
            allow_remote: false,
            max_workspaces: default_max_workspaces(),
            builtin_workspace: false,
            request_timeout_ms: default_request_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            max_respawns: default_max_respawns(),
        }
    }
}

pub(crate) fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("codesearch")
        .join("langservers")
}

fn default_max_workspaces() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_attempts() -> u32 {
    8
}

fn default_max_respawns() -> u32 {
    3
}

/// Lifecycle of a spawned language server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawn has been issued, stdio not yet wired
    Spawning,
    /// Process is alive
    Running,
    /// Process exited on its own; `None` means killed by a signal
    Exited(Option<i32>),
    /// Process was terminated by us
    Killed,
}

impl ProcessState {
    /// Whether the process is gone for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Killed)
    }
}

/// Lifecycle of the proxy's socket to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket yet
    Disconnected,
    /// Dialing, possibly retrying
    Connecting,
    /// Socket established, messages flowing
    Connected,
    /// Socket released; terminal
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ServerOptions::for_install("/opt/lsp");
        assert_eq!(opts.install_path, PathBuf::from("/opt/lsp"));
        assert!(!opts.detach);
        assert!(!opts.builtin_workspace);
        assert_eq!(opts.max_workspaces, 4);
        assert_eq!(opts.connect_attempts, 8);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let yaml = "install_path: /opt/lsp\nmax_workspaces: 2\n";
        let opts: ServerOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(opts.max_workspaces, 2);
        assert_eq!(opts.request_timeout_ms, 10_000);
        assert!(!opts.allow_remote);
    }

    #[test]
    fn test_process_state_terminal() {
        assert!(!ProcessState::Spawning.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(ProcessState::Exited(Some(0)).is_terminal());
        assert!(ProcessState::Exited(None).is_terminal());
        assert!(ProcessState::Killed.is_terminal());
    }
}
