//! JSON-RPC 2.0 request/response/notification envelopes for the Moonraker
//! API. Unlike a `kind`-tagged union, the wire format dispatches on
//! `method` for outgoing calls and on the presence of `id` for incoming
//! frames: a frame with an `id` is a response to something we sent, a
//! frame with a `method` and no `id` is a server-pushed notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// An outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u32,
}

impl RpcRequest {
    pub fn new(id: u32, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }
}

/// The error object embedded in a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message.replace('\n', " "), self.code)
    }
}

impl std::error::Error for RpcError {}

/// An incoming frame on the shared WebSocket: either a response to a call
/// we made, or a notification the server pushed unprompted.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcFrame {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcFrame {
    pub fn is_response(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Folds `result`/`error` into a `Result`, matching `RpcClient::call`'s contract.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The server-push notification methods the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    StatusUpdate,
    GcodeResponse,
    FilelistChanged,
    Other(String),
}

impl NotificationKind {
    pub fn classify(method: &str) -> Self {
        match method {
            "notify_status_update" => NotificationKind::StatusUpdate,
            "notify_gcode_response" => NotificationKind::GcodeResponse,
            "notify_filelist_changed" => NotificationKind::FilelistChanged,
            other => NotificationKind::Other(other.to_owned()),
        }
    }
}
