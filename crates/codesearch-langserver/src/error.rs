//! Error types for the language server launch subsystem

use std::path::PathBuf;

use thiserror::Error;

/// Result type for language server operations
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Errors surfaced by launching, proxying, and expanding requests to an
/// external language server. Each launch stage fails with its own variant so
/// callers can tell toolchain, executable, port, and connection failures
/// apart.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No bundled toolchain directory was found under the installation path
    #[error("no bundled toolchain found under {}", install_path.display())]
    ToolchainNotFound {
        /// Installation path that was searched
        install_path: PathBuf,
    },

    /// The language server executable is missing from the installation root
    #[error("language server executable '{executable}' not found under {}", install_path.display())]
    ExecutableNotFound {
        /// Expected executable name (platform suffix included)
        executable: String,
        /// Installation path that was searched
        install_path: PathBuf,
    },

    /// No ephemeral port could be reserved, even after a retry
    #[error("failed to acquire an ephemeral port")]
    PortAcquisitionFailed {
        #[source]
        source: std::io::Error,
    },

    /// The proxy could not reach the server socket within its retry budget
    #[error("could not connect to language server on port {port} after {attempts} attempts")]
    ConnectionTimeout {
        /// Port the proxy was dialing
        port: u16,
        /// Number of connection attempts made
        attempts: u32,
    },

    /// A new workspace root would exceed the configured concurrency cap
    #[error("workspace limit reached ({max_workspaces}), request rejected")]
    CapacityExceeded {
        /// Configured maximum number of concurrent workspaces
        max_workspaces: usize,
    },

    /// The server process could not be spawned
    #[error("failed to spawn language server process")]
    Spawn(#[source] std::io::Error),

    /// A request did not receive a response in time
    #[error("language server request timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Configured request timeout
        timeout_ms: u64,
    },

    /// The server process went away while requests were in flight
    #[error("language server exited: {reason}")]
    ServerExited {
        /// Human-readable cause
        reason: String,
    },

    /// The server has been respawned too many times already
    #[error("respawn limit reached ({max_respawns}), giving up on this server")]
    RespawnLimitExceeded {
        /// Configured maximum respawn attempts
        max_respawns: u32,
    },

    /// JSON-RPC framing or payload violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid or unreadable launcher configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Other I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
