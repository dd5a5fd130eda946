//! Language server launching and LSP proxying for CodeSearch
//!
//! This crate supervises the external language analysis servers behind the
//! code search feature: it locates a bundled toolchain on disk, spawns the
//! server process with a language-specific environment, connects a JSON-RPC
//! proxy over TCP, and hands the workspace manager a request pipeline that
//! injects capability negotiation and per-language initialize options.
//!
//! ```text
//! launch()
//!   └─ get_port()           well-known port (detach) or ephemeral reservation
//!   └─ spawn_process()      toolchain discovery, env setup, stdio capture
//!   └─ proxy.connect()      TCP + Content-Length framed JSON-RPC, retries
//!   └─ RequestExpander      initialize expansion + workspace admission
//! ```
//!
//! A launch attempt that fails at any stage kills the process it spawned;
//! an unexpected server exit fails in-flight requests instead of hanging
//! them.
//!
//! # Module Organization
//!
//! - `launcher`: orchestration and per-language launchers
//! - `process`: external process ownership and lifecycle
//! - `proxy`: socket connection, framing, request correlation
//! - `expander`: initialize expansion and workspace admission
//! - `toolchain`: bundled toolchain discovery
//! - `port`: ephemeral port reservation
//! - `config`: YAML launcher settings
//! - `logging`: log sink for server output
//! - `error`: error taxonomy
//! - `types`: core data structures

pub mod config;
pub mod error;
pub mod expander;
pub mod launcher;
pub mod logging;
pub mod port;
pub mod process;
pub mod proxy;
pub mod toolchain;
pub mod types;

// Re-export public API
pub use config::{ConfigLoader, LauncherSettings};
pub use error::{LaunchError, Result};
pub use expander::{ClientCapabilities, ExpanderOptions, RequestExpander, WorkspaceGate};
pub use launcher::{
    AcquiredPort, GoLauncher, LanguageLauncher, LaunchedServer, RespawnTracker,
    GO_WELL_KNOWN_PORT,
};
pub use logging::{LogChannel, LogSink, MemoryLogSink, TracingLogSink};
pub use port::{PortAllocator, ReservedPort};
pub use process::ExternalProgram;
pub use proxy::{LanguageServerProxy, ProxyOptions, RpcMessage, ServerEvent};
pub use toolchain::{FsToolchainLocator, Toolchain, ToolchainLocator};
pub use types::{ConnectionState, ProcessState, ServerOptions};
