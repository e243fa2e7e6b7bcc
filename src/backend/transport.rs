//! Line-delimited JSON-RPC transport.
//!
//! Handles low-level communication with a backend server:
//! - Writing JSON-RPC requests and notifications, one JSON object per line
//! - Reading lines until the response with the matching `id` arrives
//!
//! One exchange is in flight per transport at a time. The write half and the
//! read half sit behind a single lock, so concurrent callers queue up instead
//! of reading each other's responses.
//!
//! A request whose future is dropped before its response arrives is
//! cancelled on the server with `notifications/cancelled`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

struct Channel {
    writer: BoxedWriter,
    reader: BoxedReader,
}

/// Bi-directional JSON-RPC transport over a byte stream pair
/// (a child's stdin/stdout in production, an in-memory pipe in tests).
pub struct LineTransport {
    server_name: String,
    channel: Arc<Mutex<Channel>>,
}

impl LineTransport {
    /// Create a new transport from a writer (towards the server) and a
    /// reader (from the server).
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            channel: Arc::new(Mutex::new(Channel {
                writer: Box::new(writer),
                reader: BufReader::new(Box::new(reader)),
            })),
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Lines that are not a response to this request (server notifications,
    /// log noise, late answers to cancelled requests) are skipped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        let mut channel = self.channel.lock().await;
        write_line(&mut channel.writer, &json)
            .await
            .map_err(|e| self.transport_error(format!("failed to write request: {e}")))?;
        let mut pending = PendingRequest {
            id,
            server_name: &self.server_name,
            channel: &self.channel,
            armed: true,
        };

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = channel
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;

            if bytes_read == 0 {
                pending.armed = false;
                return Err(self.transport_error(
                    "server output closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: serde_json::Value = match serde_json::from_str(trimmed) {
                Ok(message) => message,
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "skipping non-JSON line");
                    continue;
                }
            };

            if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
                // Server-initiated traffic: notifications are dropped, requests
                // are refused since the proxy offers no client capabilities.
                if let Some(request_id) = message.get("id") {
                    tracing::debug!(
                        server = %self.server_name,
                        method,
                        "refusing server-initiated request"
                    );
                    let refusal = method_not_found(request_id, method);
                    write_line(&mut channel.writer, &refusal)
                        .await
                        .map_err(|e| self.transport_error(format!("failed to write reply: {e}")))?;
                }
                continue;
            }

            match serde_json::from_value::<JsonRpcResponse>(message) {
                Ok(resp) if resp.id == id => {
                    pending.armed = false;
                    return Ok(resp);
                }
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = resp.id,
                        "skipping response for another request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "skipping non-response line");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let mut json = serde_json::to_string(&notification)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        json.push('\n');

        let mut channel = self.channel.lock().await;
        write_line(&mut channel.writer, &json)
            .await
            .map_err(|e| self.transport_error(format!("failed to write notification: {e}")))
    }

    /// Send a request and unwrap its `result`, mapping JSON-RPC errors to
    /// [`McpError::ServerError`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let response = self.request(method, params).await?;
        extract_result(response)
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn method_not_found(id: &serde_json::Value, method: &str) -> String {
    let mut line = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error_codes::METHOD_NOT_FOUND,
            "message": format!("method not found: {method}"),
        },
    })
    .to_string();
    line.push('\n');
    line
}

// ─── Cancellation ────────────────────────────────────────────────────────────

/// Armed while a request waits for its response. Dropping it armed means the
/// caller gave up, so the server is told to stop working on the request.
struct PendingRequest<'a> {
    id: u64,
    server_name: &'a str,
    channel: &'a Arc<Mutex<Channel>>,
    armed: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut line = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": self.id, "reason": "request abandoned by client" },
        })
        .to_string();
        line.push('\n');

        let channel = Arc::clone(self.channel);
        let server = self.server_name.to_string();
        let id = self.id;
        // Runs once the dropped request releases the channel lock.
        runtime.spawn(async move {
            let mut channel = channel.lock().await;
            match write_line(&mut channel.writer, &line).await {
                Ok(()) => tracing::debug!(%server, request = id, "cancelled backend request"),
                Err(e) => {
                    tracing::debug!(%server, request = id, error = %e, "failed to send cancellation")
                }
            }
        });
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
