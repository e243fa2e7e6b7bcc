//! Backend session error types.

use thiserror::Error;

/// Errors raised while talking to a single backend MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The backend process failed to start.
    #[error("failed to spawn backend '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed or timed out.
    #[error("backend '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for backend '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Backend returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Backend answered with a payload that does not match the expected shape.
    #[error("invalid response from backend '{server}' to '{method}': {reason}")]
    InvalidResponse {
        server: String,
        method: String,
        reason: String,
    },

    /// The connection is not in the `running` state.
    #[error("backend '{name}' is not running")]
    NotRunning { name: String },
}
