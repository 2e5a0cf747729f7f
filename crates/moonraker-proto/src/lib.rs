//! Wire types and state model for talking to a Klipper/Moonraker backend:
//! JSON-RPC 2.0 request/response/notification envelopes, and the
//! printer-object snapshot they feed.

pub mod rpc;
pub mod snapshot;

pub use rpc::{NotificationKind, RpcError, RpcFrame, RpcRequest, JSONRPC_VERSION};
pub use snapshot::Snapshot;
