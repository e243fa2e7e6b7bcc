//! Backend sessions: one connection per aggregated MCP server.
//!
//! This module handles:
//! - Resolving a backend's command line and environment at connect time
//! - The `BackendSession` capability interface the proxy core depends on
//! - Spawning backends as child processes and speaking JSON-RPC over stdio
//! - Per-backend connection lifecycle (connect with timeout, status, cleanup)

pub mod connection;
pub mod errors;
pub mod launch;
pub mod session;
pub mod stdio;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use connection::{BackendConnection, BackendStatus, NAMESPACE_SEPARATOR};
pub use errors::McpError;
pub use launch::{resolve_args, LaunchSpec};
pub use session::{BackendSession, SessionLauncher};
pub use stdio::StdioLauncher;
pub use types::{
    CallToolResult, Content, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool,
};
