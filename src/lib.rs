//! mcp-proxy: aggregate many MCP servers behind one session.
//!
//! - [`backend`]: one connection per configured MCP server, the stdio
//!   session that speaks JSON-RPC to it, and launch-spec resolution
//! - [`proxy`]: routing by namespaced name, fan-out listing, resource
//!   ownership, collective connect/disconnect
//! - [`frontend`]: the stdio and HTTP/SSE servers exposed to MCP clients
//! - [`config`] and [`logging`]: ambient setup for the binary

pub mod backend;
pub mod config;
pub mod frontend;
pub mod logging;
pub mod proxy;

pub use backend::{BackendStatus, McpError};
pub use config::{load_config, BackendConfig, ProxyConfig, ProxyOptions};
pub use proxy::{ProxyError, ProxySession};
