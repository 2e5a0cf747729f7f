//! Moonraker JSON-RPC client.
//!
//! Owns a reconnecting WebSocket connection to the backend. A background
//! reader task drains the socket, resolving responses against a pending-call
//! table keyed by request id and forwarding server-push notifications onto
//! a side channel — the same interleaved-response/notification demultiplexing
//! a JSON-RPC peer that doesn't separate channels requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use moonraker_proto::{NotificationKind, RpcError, RpcFrame, RpcRequest};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type PendingTable = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value, RpcError>>>>>;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A server-push notification, demultiplexed from RPC responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StatusUpdate(Value),
    GcodeResponse(String),
    FilelistChanged(Value),
}

/// Pure classification of one `(method, params)` notification pair, split
/// out from the reader loop so it can be unit tested without a socket.
fn classify_notification(method: &str, params: &Value) -> Option<Notification> {
    match NotificationKind::classify(method) {
        NotificationKind::StatusUpdate => params
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .map(Notification::StatusUpdate),
        NotificationKind::GcodeResponse => params
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(|s| Notification::GcodeResponse(s.to_owned())),
        NotificationKind::FilelistChanged => Some(Notification::FilelistChanged(params.clone())),
        NotificationKind::Other(_) => None,
    }
}

/// Errors observed by a caller of [`RpcClient::call`].
#[derive(Debug)]
pub enum CallError {
    NotConnected,
    Disconnected,
    Timeout,
    Rpc(RpcError),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::NotConnected => write!(f, "not connected to backend"),
            CallError::Disconnected => write!(f, "backend connection lost"),
            CallError::Timeout => write!(f, "RPC call timed out"),
            CallError::Rpc(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for CallError {}

/// A connected session: the writer half plus the pending-call table the
/// reader task resolves into. Dropped wholesale on reconnect.
struct Session {
    sink: Mutex<WsSink>,
    pending: PendingTable,
    next_id: AtomicU32,
}

/// Client for the backend's JSON-RPC API. Reconnects transparently on
/// transport failure via [`RpcClient::connect_with_backoff`]; callers only
/// ever observe [`CallError`]. A disconnect is surfaced to whoever owns
/// this client via [`RpcClient::disconnected`], so the bridge's supervisor
/// loop can re-run the initial query and re-subscribe once a fresh
/// connection is up — see `bridge.rs`.
pub struct RpcClient {
    url: String,
    session: Arc<Mutex<Option<Arc<Session>>>>,
    notifications: mpsc::UnboundedSender<Notification>,
    disconnected: Arc<Notify>,
}

impl RpcClient {
    /// Notifications observed on any future connection are pushed onto
    /// `notifications`. Call [`RpcClient::connect`] before issuing calls.
    pub fn new(url: impl Into<String>, notifications: mpsc::UnboundedSender<Notification>) -> Self {
        RpcClient {
            url: url.into(),
            session: Arc::new(Mutex::new(None)),
            notifications,
            disconnected: Arc::new(Notify::new()),
        }
    }

    /// Connects once. Returns an error rather than retrying; see
    /// [`RpcClient::connect_with_backoff`] for the retrying variant used at
    /// startup and after a dropped connection.
    pub async fn connect(&self) -> Result<(), CallError> {
        let (ws, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|_| CallError::Disconnected)?;
        let (sink, mut stream) = ws.split();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let session = Arc::new(Session {
            sink: Mutex::new(sink),
            pending: pending.clone(),
            next_id: AtomicU32::new(1),
        });

        let notif_tx = self.notifications.clone();
        let session_slot = self.session.clone();
        let disconnected = self.disconnected.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let Ok(msg) = frame else { break };
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Ok(frame) = serde_json::from_str::<RpcFrame>(&text) else {
                    warn!("unparseable RPC frame: {text}");
                    continue;
                };
                if frame.is_response() {
                    let id = frame.id.expect("is_response guarantees Some");
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(frame.into_result());
                    }
                } else if frame.is_notification() {
                    let method = frame.method.clone().unwrap_or_default();
                    let params = frame.params.clone().unwrap_or(Value::Null);
                    if let Some(notification) = classify_notification(&method, &params) {
                        let _ = notif_tx.send(notification);
                    }
                }
            }
            debug!("RPC reader loop exiting, failing outstanding calls");
            for (_, tx) in pending.lock().await.drain() {
                let _ = tx.send(Err(RpcError {
                    code: -1,
                    message: "connection lost".into(),
                    data: None,
                }));
            }
            *session_slot.lock().await = None;
            disconnected.notify_one();
        });

        *self.session.lock().await = Some(session);
        info!(url = %self.url, "connected to backend");
        Ok(())
    }

    /// Connects with exponential backoff (1s doubling to a 60s cap),
    /// retrying forever until a connection succeeds.
    pub async fn connect_with_backoff(&self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.connect().await {
                Ok(()) => return,
                Err(_) => {
                    warn!(backoff_secs = backoff.as_secs(), "backend connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Suspends until the active connection's reader task exits (socket
    /// closed, read error, or unparseable close frame). Delivers at most
    /// one wakeup per disconnect: backed by `notify_one`, so a disconnect
    /// that happens before the caller starts waiting is still observed
    /// (unlike `notify_waiters`, which only wakes already-registered
    /// waiters) — exactly one outage is ever buffered, which matches there
    /// being exactly one session at a time.
    pub async fn disconnected(&self) {
        self.disconnected.notified().await;
    }

    /// Issues one JSON-RPC call and awaits its matching response, or times
    /// out after [`CALL_TIMEOUT`].
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        let session = {
            let guard = self.session.lock().await;
            guard.as_ref().cloned().ok_or(CallError::NotConnected)?
        };

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = session.pending.lock().await;
            let mut candidate = session.next_id.fetch_add(1, Ordering::Relaxed);
            // Skip any id still awaiting a response — only reachable once
            // the u32 counter has wrapped all the way around with that
            // call still in flight, but the invariant is unconditional.
            while pending.contains_key(&candidate) {
                candidate = session.next_id.fetch_add(1, Ordering::Relaxed);
            }
            pending.insert(candidate, tx);
            candidate
        };
        let request = RpcRequest::new(id, method, params);

        let text = serde_json::to_string(&request).expect("RpcRequest always serializes");
        {
            let mut sink = session.sink.lock().await;
            if sink.send(Message::Text(text.into())).await.is_err() {
                session.pending.lock().await.remove(&id);
                return Err(CallError::Disconnected);
            }
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(CallError::Rpc(err)),
            Ok(Err(_)) => Err(CallError::Disconnected),
            Err(_) => {
                session.pending.lock().await.remove(&id);
                Err(CallError::Timeout)
            }
        }
    }

    /// Convenience wrapper for `printer.gcode.script`.
    pub async fn gcode_script(&self, script: impl Into<String>) -> Result<Value, CallError> {
        self.call(
            "printer.gcode.script",
            Some(serde_json::json!({ "script": script.into() })),
        )
        .await
    }
}

/// The RPC surface the Translator drives, split out so tests can swap in an
/// in-memory fake instead of a live WebSocket connection.
pub trait RpcSender: Send + Sync {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError>;

    async fn gcode_script(&self, script: String) -> Result<Value, CallError> {
        self.call(
            "printer.gcode.script",
            Some(serde_json::json!({ "script": script })),
        )
        .await
    }
}

impl RpcSender for RpcClient {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        RpcClient::call(self, method, params).await
    }

    async fn gcode_script(&self, script: String) -> Result<Value, CallError> {
        RpcClient::gcode_script(self, script).await
    }
}
