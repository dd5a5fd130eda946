//! Launch orchestration for external language servers
//!
//! A launcher turns a [`ServerOptions`] value into a ready
//! [`RequestExpander`]: reserve a port, spawn the server process with its
//! language-specific environment, connect the proxy, and bind the expander.
//! In detach mode the spawn step is skipped and the proxy attaches to an
//! externally managed server on the language's well-known port.

pub mod go;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{LaunchError, Result};
use crate::expander::{ExpanderOptions, RequestExpander};
use crate::logging::LogSink;
use crate::port::{PortAllocator, ReservedPort};
use crate::process::ExternalProgram;
use crate::proxy::{LanguageServerProxy, ProxyOptions};
use crate::types::ServerOptions;

pub use go::{GoLauncher, GO_WELL_KNOWN_PORT};

/// A port the launcher may hand to the server process
pub enum AcquiredPort {
    /// Fixed, language-specific port of an externally managed server
    WellKnown(u16),
    /// Freshly reserved ephemeral port, held until released
    Ephemeral(ReservedPort),
}

impl AcquiredPort {
    pub fn port(&self) -> u16 {
        match self {
            AcquiredPort::WellKnown(port) => *port,
            AcquiredPort::Ephemeral(reserved) => reserved.port(),
        }
    }

    /// Give up any reservation so the server process can bind the port
    pub fn release(self) -> u16 {
        match self {
            AcquiredPort::WellKnown(port) => port,
            AcquiredPort::Ephemeral(reserved) => reserved.release(),
        }
    }
}

/// The outcome of a successful launch
#[derive(Debug)]
pub struct LaunchedServer {
    /// Ready request pipeline for the workspace manager
    pub expander: RequestExpander,
    /// The spawned process; `None` in detach mode
    pub program: Option<ExternalProgram>,
    /// Port the server is reachable on
    pub port: u16,
}

impl LaunchedServer {
    /// Terminate the server process (if owned) and release the socket
    pub async fn shutdown(&self) {
        self.expander.shutdown().await;
        if let Some(program) = &self.program {
            program.kill().await;
        }
    }
}

/// A language-specific launcher.
///
/// Implementations supply discovery, environment, and initialize options;
/// the provided [`launch`](LanguageLauncher::launch) method runs the common
/// orchestration and guarantees that a failed attempt never leaves an
/// orphaned server process behind.
#[async_trait]
pub trait LanguageLauncher: Send + Sync {
    /// Language identifier (e.g. "go")
    fn language(&self) -> &str;

    /// Configuration this launcher was constructed with
    fn options(&self) -> &ServerOptions;

    /// Fixed port used to attach to an externally managed server
    fn well_known_port(&self) -> u16;

    /// Language-specific `initializationOptions` payload
    fn initialize_options(&self) -> Value;

    /// Resolve the installation and spawn the server process listening on
    /// `port`, with stdio wired to `log`
    async fn spawn_process(&self, port: u16, log: Arc<dyn LogSink>) -> Result<ExternalProgram>;

    /// Pick the port for this launch: the well-known port in detach mode, a
    /// fresh ephemeral reservation otherwise
    async fn get_port(&self) -> Result<AcquiredPort> {
        if self.options().detach {
            Ok(AcquiredPort::WellKnown(self.well_known_port()))
        } else {
            PortAllocator::reserve().await.map(AcquiredPort::Ephemeral)
        }
    }

    /// Launch (or attach to) the server and return a ready request pipeline
    async fn launch(&self, log: Arc<dyn LogSink>) -> Result<LaunchedServer> {
        let options = self.options();
        let acquired = self.get_port().await?;
        let port = acquired.port();

        let program = if options.detach {
            info!(
                language = self.language(),
                port, "attaching to externally managed language server"
            );
            None
        } else {
            let port = acquired.release();
            Some(self.spawn_process(port, Arc::clone(&log)).await?)
        };

        let proxy = Arc::new(LanguageServerProxy::new(port, ProxyOptions::from(options)));
        if let Err(err) = proxy.connect().await {
            if let Some(program) = &program {
                warn!(
                    language = self.language(),
                    port, "connect failed, terminating spawned server"
                );
                program.kill().await;
            }
            return Err(err);
        }

        if let Some(program) = &program {
            proxy.monitor_process(program.subscribe_state());
        }

        let expander = RequestExpander::new(
            proxy,
            self.initialize_options(),
            ExpanderOptions::from(options),
        );

        log.info(&format!(
            "{} language server ready on port {}",
            self.language(),
            port
        ));

        Ok(LaunchedServer {
            expander,
            program,
            port,
        })
    }
}

/// Respawn bookkeeping for servers that exit unexpectedly.
///
/// The workspace manager asks `prepare_respawn` before relaunching; each
/// grant increases the backoff and counts against the configured ceiling.
#[derive(Debug)]
pub struct RespawnTracker {
    attempts: u32,
    max_respawns: u32,
    last_attempt: Option<Instant>,
}

impl RespawnTracker {
    pub fn new(max_respawns: u32) -> Self {
        Self {
            attempts: 0,
            max_respawns,
            last_attempt: None,
        }
    }

    /// Respawn attempts granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the last respawn was granted
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Whether another respawn is allowed
    pub fn can_respawn(&self) -> bool {
        self.attempts < self.max_respawns
    }

    /// Grant a respawn attempt and return the backoff to wait first
    pub fn prepare_respawn(&mut self) -> Result<Duration> {
        if !self.can_respawn() {
            return Err(LaunchError::RespawnLimitExceeded {
                max_respawns: self.max_respawns,
            });
        }

        self.attempts += 1;
        self.last_attempt = Some(Instant::now());
        let backoff = respawn_backoff(self.attempts);
        debug!(
            attempts = self.attempts,
            backoff_ms = backoff.as_millis() as u64,
            "respawn granted"
        );
        Ok(backoff)
    }

    /// Forget past failures after a healthy run
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }
}

/// `base * 2^attempt`, capped
fn respawn_backoff(attempt: u32) -> Duration {
    const BASE_BACKOFF_MS: u64 = 100;
    const MAX_BACKOFF_MS: u64 = 30_000;

    let backoff_ms = BASE_BACKOFF_MS
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respawn_backoff_grows_and_caps() {
        assert_eq!(respawn_backoff(1), Duration::from_millis(200));
        assert_eq!(respawn_backoff(2), Duration::from_millis(400));
        assert_eq!(respawn_backoff(3), Duration::from_millis(800));
        assert_eq!(respawn_backoff(30), Duration::from_millis(30_000));
    }

    #[test]
    fn test_respawn_tracker_enforces_ceiling() {
        let mut tracker = RespawnTracker::new(2);
        assert!(tracker.can_respawn());

        assert!(tracker.prepare_respawn().is_ok());
        assert!(tracker.prepare_respawn().is_ok());
        assert!(!tracker.can_respawn());

        let err = tracker.prepare_respawn().unwrap_err();
        assert!(matches!(
            err,
            LaunchError::RespawnLimitExceeded { max_respawns: 2 }
        ));
    }

    #[test]
    fn test_respawn_tracker_reset() {
        let mut tracker = RespawnTracker::new(1);
        let _ = tracker.prepare_respawn();
        assert!(!tracker.can_respawn());

        tracker.reset();
        assert!(tracker.can_respawn());
        assert_eq!(tracker.attempts(), 0);
    }
}
