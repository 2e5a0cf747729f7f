pub mod autoreport;
pub mod bridge;
pub mod config;
pub mod error;
pub mod mirror;
pub mod rpc_client;
pub mod serial;
pub mod templates;
pub mod translator;
