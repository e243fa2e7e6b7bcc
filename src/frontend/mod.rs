//! Frontend adapters that expose a [`ProxySession`](crate::proxy::ProxySession)
//! to MCP clients.
//!
//! - `stdio`: one client on the process's stdin/stdout
//! - `sse`: HTTP clients over server-sent events, plus `/servers` status
//! - `rpc`: JSON-RPC dispatch and request tracking shared by both

pub mod rpc;
pub mod sse;
pub mod stdio;

pub use rpc::{handle_request, SERVER_NAME};
pub use stdio::serve;
