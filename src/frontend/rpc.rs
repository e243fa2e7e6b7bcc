//! JSON-RPC message handling shared by the frontends.
//!
//! A frontend feeds raw messages to [`dispatch_raw`]. Requests run
//! concurrently as tasks tracked by an [`InFlight`] set, and their encoded
//! responses are pushed to the frontend's outbox in completion order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinSet};

use crate::backend::stdio::PROTOCOL_VERSION;
use crate::backend::types::{error_codes, JsonRpcError};
use crate::proxy::{ProxyError, ProxySession};

/// Name reported in the `initialize` response.
pub const SERVER_NAME: &str = "mcp-proxy";

// ─── Request Parameters ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NamedParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct UriParams {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct CancelledParams {
    #[serde(rename = "requestId")]
    request_id: Value,
    #[serde(default)]
    reason: Option<String>,
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

fn invalid_params(reason: impl std::fmt::Display) -> JsonRpcError {
    JsonRpcError {
        code: error_codes::INVALID_PARAMS,
        message: format!("invalid params: {reason}"),
        data: None,
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params).map_err(invalid_params)
}

impl From<ProxyError> for JsonRpcError {
    fn from(e: ProxyError) -> Self {
        JsonRpcError {
            code: e.rpc_code(),
            message: e.rpc_message(),
            data: e.rpc_data(),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError {
        code: error_codes::INTERNAL_ERROR,
        message: format!("failed to serialize result: {e}"),
        data: None,
    })
}

/// Answer one request against the proxy.
pub async fn handle_request(
    proxy: &ProxySession,
    method: &str,
    params: Value,
) -> Result<Value, JsonRpcError> {
    match method {
        "initialize" => {
            let version = params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            Ok(serde_json::json!({
                "protocolVersion": version,
                "capabilities": {
                    "tools": {},
                    "prompts": {},
                    "resources": {},
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }))
        }
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({ "tools": to_value(&proxy.list_tools().await)? })),
        "tools/call" => {
            let NamedParams { name, arguments } = parse_params(params)?;
            let result = proxy.call_tool_result(&name, arguments).await?;
            to_value(&result)
        }
        "prompts/list" => {
            Ok(serde_json::json!({ "prompts": to_value(&proxy.list_prompts().await)? }))
        }
        "prompts/get" => {
            let NamedParams { name, arguments } = parse_params(params)?;
            let result = proxy.get_prompt(&name, arguments).await?;
            to_value(&result)
        }
        "resources/list" => {
            Ok(serde_json::json!({ "resources": to_value(&proxy.list_resources().await)? }))
        }
        "resources/read" => {
            let UriParams { uri } = parse_params(params)?;
            let result = proxy.read_resource(&uri).await?;
            to_value(&result)
        }
        other => Err(JsonRpcError {
            code: error_codes::METHOD_NOT_FOUND,
            message: format!("method not found: {other}"),
            data: None,
        }),
    }
}

/// Encode a response as one newline-terminated line.
pub fn encode_response(id: &Value, outcome: Result<Value, JsonRpcError>) -> String {
    let message = match outcome {
        Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    };
    let mut line = message.to_string();
    line.push('\n');
    line
}

fn parse_error(reason: impl std::fmt::Display) -> String {
    let error = JsonRpcError {
        code: error_codes::PARSE_ERROR,
        message: format!("parse error: {reason}"),
        data: None,
    };
    encode_response(&Value::Null, Err(error))
}

// ─── In-Flight Requests ─────────────────────────────────────────────────────

/// Requests being served, keyed by the JSON text of their id.
///
/// Each spawned request also gets a sequence number, so a finished request
/// never evicts a newer one that reused its id.
#[derive(Default)]
pub struct InFlight {
    tasks: JoinSet<(String, u64)>,
    handles: HashMap<String, (u64, AbortHandle)>,
    next_seq: u64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of requests that can still be cancelled by id.
    pub fn cancellable(&self) -> usize {
        self.handles.len()
    }

    /// Wait for the next request to finish. Pending forever when empty.
    pub async fn join_next(&mut self) -> Option<Result<(String, u64), JoinError>> {
        self.tasks.join_next().await
    }

    /// Forget a finished request, unless its id has been reused since.
    pub fn finished(&mut self, done: Result<(String, u64), JoinError>) {
        let Ok((key, seq)) = done else {
            return;
        };
        if matches!(self.handles.get(&key), Some((current, _)) if *current == seq) {
            self.handles.remove(&key);
        }
    }

    fn spawn(
        &mut self,
        proxy: Arc<ProxySession>,
        id: Value,
        method: String,
        params: Value,
        outbox: mpsc::Sender<String>,
    ) {
        let key = id.to_string();
        let seq = self.next_seq;
        self.next_seq += 1;

        let task_key = key.clone();
        let handle = self.tasks.spawn(async move {
            let outcome = handle_request(&proxy, &method, params).await;
            if let Err(error) = &outcome {
                tracing::warn!(%method, code = error.code, error = %error.message, "request failed");
            }
            let _ = outbox.send(encode_response(&id, outcome)).await;
            (task_key, seq)
        });
        // A reused id takes over the cancellation slot; both still get answered.
        self.handles.insert(key, (seq, handle));
    }

    /// Abort the request with this id. No response is sent for it.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.handles.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort everything and wait for the tasks to wind down.
    pub async fn shutdown(&mut self) {
        self.handles.clear();
        self.tasks.shutdown().await;
    }
}

// ─── Message Intake ─────────────────────────────────────────────────────────

/// Handle one raw message from the client.
///
/// Malformed input (bad UTF-8, bad JSON) is answered with a parse error and
/// never ends the session.
pub async fn dispatch_raw(
    proxy: &Arc<ProxySession>,
    raw: &[u8],
    outbox: &mpsc::Sender<String>,
    in_flight: &mut InFlight,
) {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text.trim(),
        Err(e) => {
            tracing::warn!(error = %e, "frontend sent invalid UTF-8");
            let _ = outbox.send(parse_error(e)).await;
            return;
        }
    };
    if text.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = outbox.send(parse_error(e)).await;
            return;
        }
    };

    let Some(method) = message.get("method").and_then(Value::as_str) else {
        let is_reply = message.get("result").is_some() || message.get("error").is_some();
        if message.get("id").is_some() && !is_reply {
            let error = JsonRpcError {
                code: error_codes::INVALID_REQUEST,
                message: "request has no method".into(),
                data: None,
            };
            let _ = outbox.send(encode_response(&message["id"], Err(error))).await;
        }
        return;
    };
    let method = method.to_string();
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    match message.get("id").cloned() {
        Some(id) => {
            tracing::debug!(%method, %id, "frontend request");
            in_flight.spawn(Arc::clone(proxy), id, method, params, outbox.clone());
        }
        None => handle_notification(&method, params, in_flight),
    }
}

fn handle_notification(method: &str, params: Value, in_flight: &mut InFlight) {
    match method {
        "notifications/cancelled" => match serde_json::from_value::<CancelledParams>(params) {
            Ok(cancel) => {
                let key = cancel.request_id.to_string();
                let found = in_flight.cancel(&key);
                tracing::info!(
                    request = %key,
                    reason = ?cancel.reason,
                    found,
                    "request cancelled by frontend"
                );
            }
            Err(e) => tracing::warn!(error = %e, "malformed cancellation"),
        },
        "notifications/initialized" => tracing::debug!("frontend initialized"),
        other => tracing::debug!(method = other, "ignoring notification"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::testing::{FakeBackend, FakeLauncher};
    use crate::config::{BackendConfig, ProxyOptions};

    async fn connected(launcher: FakeLauncher, ids: &[&str]) -> Arc<ProxySession> {
        let configs = ids.iter().map(|id| BackendConfig::new(id, "fake")).collect();
        let proxy = ProxySession::new(configs, Arc::new(launcher), ProxyOptions::default()).unwrap();
        proxy.connect_all().await;
        Arc::new(proxy)
    }

    async fn next_line(rx: &mut mpsc::Receiver<String>) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_tool_error_flag_forwarded() {
        let launcher = FakeLauncher::new().with("alpha", FakeBackend::new().tool("flaky").tool_errors());
        let proxy = connected(launcher, &["alpha"]).await;

        let result = handle_request(&proxy, "tools/call", serde_json::json!({"name": "alpha/flaky"}))
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "flaky {}");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_parse_error() {
        let proxy = connected(FakeLauncher::new(), &[]).await;
        let (tx, mut rx) = mpsc::channel(8);
        let mut in_flight = InFlight::new();

        dispatch_raw(&proxy, b"\xff\xfe garbage\n", &tx, &mut in_flight).await;
        let resp = next_line(&mut rx).await;
        assert_eq!(resp["error"]["code"], error_codes::PARSE_ERROR);
        assert!(resp["id"].is_null());
    }

    #[tokio::test]
    async fn test_finished_request_keeps_newer_handle_for_reused_id() {
        let proxy = connected(FakeLauncher::new(), &[]).await;
        let (tx, mut rx) = mpsc::channel(8);
        let mut in_flight = InFlight::new();

        let first = br#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#;
        dispatch_raw(&proxy, first, &tx, &mut in_flight).await;
        let first_done = in_flight.join_next().await.unwrap();

        // same id again before the first completion is reaped
        dispatch_raw(&proxy, first, &tx, &mut in_flight).await;
        assert_eq!(in_flight.cancellable(), 1);

        in_flight.finished(first_done);
        assert_eq!(in_flight.cancellable(), 1, "newer request must stay cancellable");
        assert!(in_flight.cancel("5"));

        let resp = next_line(&mut rx).await;
        assert_eq!(resp["id"], 5);
    }
}
