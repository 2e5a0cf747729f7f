//! Top-level error type for fatal startup/shutdown paths. Per-command
//! failures never reach here — the Translator catches those at its own
//! dispatch boundary and renders an `Error:…` reply instead.

use crate::rpc_client::CallError;
use crate::serial::SerialError;

#[derive(Debug)]
pub enum BridgeError {
    Serial(SerialError),
    Rpc(CallError),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Serial(e) => write!(f, "serial link error: {e}"),
            BridgeError::Rpc(e) => write!(f, "backend RPC error: {e}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<SerialError> for BridgeError {
    fn from(e: SerialError) -> Self {
        BridgeError::Serial(e)
    }
}

impl From<CallError> for BridgeError {
    fn from(e: CallError) -> Self {
        BridgeError::Rpc(e)
    }
}
