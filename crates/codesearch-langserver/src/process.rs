//! External language server process lifecycle

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{LaunchError, Result};
use crate::logging::LogSink;
use crate::types::ProcessState;

/// How long `kill` waits for the process to actually go away
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Owns one spawned language server process.
///
/// Stdout and stderr are captured and forwarded line by line to the
/// [`LogSink`]; the exit status is published on a [`watch`] channel so the
/// proxy and launcher can fail fast instead of hanging on a dead server.
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ExternalProgram {
    language: String,
    pid: Option<u32>,
    state_rx: watch::Receiver<ProcessState>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ExternalProgram {
    /// Spawn `program` with the given arguments and environment, stdio
    /// captured rather than inherited.
    pub async fn spawn(
        language: &str,
        program: &Path,
        args: &[String],
        env: HashMap<String, String>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let (state_tx, state_rx) = watch::channel(ProcessState::Spawning);

        debug!(
            language,
            program = %program.display(),
            "spawning language server process"
        );

        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                error!(language, program = %program.display(), error = %err, "spawn failed");
                LaunchError::Spawn(err)
            })?;

        let pid = child.id();
        info!(language, pid = ?pid, "language server process spawned");

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Arc::clone(&log), false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, Arc::clone(&log), true);
        }

        state_tx.send_replace(ProcessState::Running);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watch_language = language.to_string();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    warn!(language = %watch_language, code = ?code, "language server process exited");
                    state_tx.send_replace(ProcessState::Exited(code));
                }
                requested = kill_rx => {
                    // An Err means the handle was dropped; either way the
                    // process must not outlive its owner.
                    if requested.is_err() {
                        debug!(language = %watch_language, "process handle dropped, terminating");
                    }
                    if let Err(err) = child.start_kill() {
                        warn!(language = %watch_language, error = %err, "kill signal failed");
                    }
                    let _ = child.wait().await;
                    state_tx.send_replace(ProcessState::Killed);
                }
            }
        });

        Ok(Self {
            language: language.to_string(),
            pid,
            state_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    /// OS process id, if the process ever started
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    /// Whether the process is still alive
    pub fn is_running(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Observe lifecycle transitions; used by the proxy to fail in-flight
    /// requests when the server dies.
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Terminate the process and wait (bounded) for it to be reaped.
    ///
    /// Killing an already-exited process is a no-op.
    pub async fn kill(&self) {
        if let Some(kill_tx) = self.kill_tx.lock().await.take() {
            debug!(language = %self.language, pid = ?self.pid, "killing language server process");
            let _ = kill_tx.send(());
        }

        let mut state_rx = self.state_rx.clone();
        let reaped = async {
            loop {
                let terminal = state_rx.borrow().is_terminal();
                if terminal {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(KILL_WAIT, reaped).await.is_err() {
            warn!(language = %self.language, pid = ?self.pid, "timed out waiting for process exit");
        }
    }
}

/// Pump one captured stream into the log sink, line by line
fn forward_lines<R>(stream: R, log: Arc<dyn LogSink>, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stderr {
                        log.stderr(&line);
                    } else {
                        log.stdout(&line);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "server output stream closed");
                    break;
                }
            }
        }
    });
}
