//! Socket connection to the language server process

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{self, RpcMessage, RpcResponse};
use crate::error::{LaunchError, Result};
use crate::types::{ConnectionState, ProcessState, ServerOptions};

/// Tuning knobs for the proxy connection
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Host the server listens on
    pub host: String,
    /// Connection attempts before giving up
    pub connect_attempts: u32,
    /// Per-request reply deadline
    pub request_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            connect_attempts: 8,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerOptions> for ProxyOptions {
    fn from(options: &ServerOptions) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            connect_attempts: options.connect_attempts,
            request_timeout: Duration::from_millis(options.request_timeout_ms),
        }
    }
}

/// A server-initiated message surfaced to subscribers
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Notification from the server (diagnostics, log messages, ...)
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Request from the server; answer it with [`LanguageServerProxy::respond`]
    Request {
        id: u64,
        method: String,
        params: Option<Value>,
    },
}

struct PendingRequest {
    method: String,
    sent_at: Instant,
    reply: oneshot::Sender<Result<Value>>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("method", &self.method)
            .field("sent_at", &self.sent_at)
            .finish()
    }
}

type PendingMap = Arc<RwLock<HashMap<u64, PendingRequest>>>;
type OutgoingSlot = Arc<RwLock<Option<mpsc::Sender<RpcMessage>>>>;
type SharedState = Arc<RwLock<ConnectionState>>;

/// Multiplexes JSON-RPC traffic between the workspace side and one external
/// language server over TCP.
///
/// Messages are forwarded unmodified; the only bookkeeping is the id-based
/// correlation of requests to responses that request expansion relies on.
#[derive(Debug)]
pub struct LanguageServerProxy {
    port: u16,
    options: ProxyOptions,
    next_id: AtomicU64,
    state: SharedState,
    pending: PendingMap,
    outgoing: OutgoingSlot,
    events: broadcast::Sender<ServerEvent>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl LanguageServerProxy {
    pub fn new(port: u16, options: ProxyOptions) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            port,
            options,
            next_id: AtomicU64::new(1),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            pending: Arc::new(RwLock::new(HashMap::new())),
            outgoing: Arc::new(RwLock::new(None)),
            events,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Port this proxy dials
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Establish the socket, retrying with backoff while the server is still
    /// opening its listening port.
    pub async fn connect(&self) -> Result<()> {
        *self.state.write().await = ConnectionState::Connecting;

        let mut attempt: u32 = 0;
        let stream = loop {
            match TcpStream::connect((self.options.host.as_str(), self.port)).await {
                Ok(stream) => break stream,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.options.connect_attempts {
                        *self.state.write().await = ConnectionState::Disconnected;
                        warn!(port = self.port, attempts = attempt, error = %err, "giving up on server socket");
                        return Err(LaunchError::ConnectionTimeout {
                            port: self.port,
                            attempts: attempt,
                        });
                    }
                    let backoff = connect_backoff(attempt);
                    debug!(
                        port = self.port,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "server socket not ready, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "could not disable Nagle on server socket");
        }

        let (read_half, mut write_half) = stream.into_split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<RpcMessage>(64);
        *self.outgoing.write().await = Some(outgoing_tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(err) = codec::write_message(&mut write_half, &message).await {
                    warn!(error = %err, "failed to write to language server");
                    break;
                }
            }
        });

        let reader = tokio::spawn(run_reader(
            read_half,
            Arc::clone(&self.pending),
            Arc::clone(&self.outgoing),
            Arc::clone(&self.state),
            self.events.clone(),
        ));

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push(writer);
            tasks.push(reader);
        }

        *self.state.write().await = ConnectionState::Connected;
        info!(port = self.port, attempts = attempt + 1, "connected to language server");
        Ok(())
    }

    /// Watch the server process; when it dies, fail everything in flight
    /// instead of letting callers hang.
    pub fn monitor_process(&self, mut process_rx: watch::Receiver<ProcessState>) {
        let pending = Arc::clone(&self.pending);
        let outgoing = Arc::clone(&self.outgoing);
        let state = Arc::clone(&self.state);
        let port = self.port;

        let handle = tokio::spawn(async move {
            loop {
                let terminal = process_rx.borrow().is_terminal();
                if terminal {
                    break;
                }
                if process_rx.changed().await.is_err() {
                    return;
                }
            }
            warn!(port, "language server process is gone, closing proxy");
            close_shared(&state, &outgoing, &pending, "language server process exited").await;
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Send a request and await its correlated response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let sender = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or_else(|| LaunchError::Protocol("proxy is not connected".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.write().await.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                reply: reply_tx,
            },
        );

        if sender
            .send(RpcMessage::request(id, method, params))
            .await
            .is_err()
        {
            self.pending.write().await.remove(&id);
            return Err(LaunchError::ServerExited {
                reason: "language server connection closed".to_string(),
            });
        }

        match tokio::time::timeout(self.options.request_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LaunchError::ServerExited {
                reason: "connection closed before reply".to_string(),
            }),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(LaunchError::RequestTimeout {
                    timeout_ms: self.options.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let sender = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or_else(|| LaunchError::Protocol("proxy is not connected".to_string()))?;

        sender
            .send(RpcMessage::notification(method, params))
            .await
            .map_err(|_| LaunchError::ServerExited {
                reason: "language server connection closed".to_string(),
            })
    }

    /// Answer a server-initiated request
    pub async fn respond(&self, id: u64, result: Value) -> Result<()> {
        let sender = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or_else(|| LaunchError::Protocol("proxy is not connected".to_string()))?;

        sender
            .send(RpcMessage::response(id, result))
            .await
            .map_err(|_| LaunchError::ServerExited {
                reason: "language server connection closed".to_string(),
            })
    }

    /// Subscribe to server-initiated notifications and requests
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Number of requests still awaiting a reply
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Release the socket; in-flight requests fail. Idempotent.
    pub async fn disconnect(&self) {
        close_shared(&self.state, &self.outgoing, &self.pending, "proxy disconnected").await;
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }
}

/// Pump incoming frames, correlating responses and broadcasting the rest
async fn run_reader(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    outgoing: OutgoingSlot,
    state: SharedState,
    events: broadcast::Sender<ServerEvent>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        match codec::read_message(&mut reader).await {
            Ok(Some(RpcMessage::Response(response))) => {
                resolve_response(&pending, response).await;
            }
            Ok(Some(RpcMessage::Notification(notification))) => {
                let _ = events.send(ServerEvent::Notification {
                    method: notification.method,
                    params: notification.params,
                });
            }
            Ok(Some(RpcMessage::Request(request))) => {
                debug!(method = %request.method, id = request.id, "server-initiated request");
                let _ = events.send(ServerEvent::Request {
                    id: request.id,
                    method: request.method,
                    params: request.params,
                });
            }
            Ok(None) => {
                debug!("language server closed the connection");
                close_shared(&state, &outgoing, &pending, "connection closed by server").await;
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to read from language server");
                close_shared(&state, &outgoing, &pending, "unreadable server message").await;
                return;
            }
        }
    }
}

async fn resolve_response(pending: &RwLock<HashMap<u64, PendingRequest>>, response: RpcResponse) {
    let entry = pending.write().await.remove(&response.id);
    match entry {
        Some(request) => {
            debug!(
                id = response.id,
                method = %request.method,
                latency_ms = request.sent_at.elapsed().as_millis() as u64,
                "response received"
            );
            let outcome = match response.error {
                Some(error) => Err(LaunchError::Protocol(format!(
                    "{}: {}",
                    error.code, error.message
                ))),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
            let _ = request.reply.send(outcome);
        }
        None => {
            warn!(id = response.id, "response for unknown request id");
        }
    }
}

/// Tear down shared connection state once; later calls are no-ops
async fn close_shared(
    state: &RwLock<ConnectionState>,
    outgoing: &RwLock<Option<mpsc::Sender<RpcMessage>>>,
    pending: &RwLock<HashMap<u64, PendingRequest>>,
    reason: &str,
) {
    {
        let mut state = state.write().await;
        if *state == ConnectionState::Closed {
            return;
        }
        *state = ConnectionState::Closed;
    }

    outgoing.write().await.take();

    let failed: Vec<(u64, PendingRequest)> = pending.write().await.drain().collect();
    for (id, request) in failed {
        debug!(id, method = %request.method, "failing in-flight request: {}", reason);
        let _ = request.reply.send(Err(LaunchError::ServerExited {
            reason: reason.to_string(),
        }));
    }
}

/// `base * 2^attempt`, capped; the spawned server may need a moment before
/// its listening socket is open
fn connect_backoff(attempt: u32) -> Duration {
    const BASE_BACKOFF_MS: u64 = 100;
    const MAX_BACKOFF_MS: u64 = 5_000;

    let backoff_ms = BASE_BACKOFF_MS
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(backoff_ms)
}
