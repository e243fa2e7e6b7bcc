//! Subprocess-stdio backend sessions.
//!
//! Spawns a backend server as a child process and speaks line-delimited
//! JSON-RPC with it over stdin/stdout. Stderr is drained in the background so
//! a chatty server never blocks on a full pipe; its tail is kept for handshake
//! failure diagnostics.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::launch::LaunchSpec;
use super::session::{BackendSession, SessionLauncher};
use super::transport::LineTransport;
use super::types::{
    CallToolResult, GetPromptResult, InitializeResult, Prompt, ReadResourceResult,
    Resource, Tool,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol revision announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long `close` waits for the killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum number of stderr bytes kept for diagnostics.
const STDERR_TAIL_LIMIT: usize = 2000;

// ─── StdioSession ────────────────────────────────────────────────────────────

/// A backend server running as a child process.
pub struct StdioSession {
    name: String,
    transport: LineTransport,
    process: Mutex<Option<Child>>,
    stderr_tail: Arc<StdMutex<String>>,
}

impl StdioSession {
    /// Spawn the process described by `spec`. No protocol traffic happens yet.
    pub fn spawn(name: &str, spec: &LaunchSpec) -> Result<Self, McpError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        cmd.env_clear();
        cmd.envs(&spec.env);
        if let Some(dir) = spec.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{}: {e}", spec.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(StdMutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(name.to_string(), stderr, Arc::clone(&stderr_tail)));
        }

        tracing::debug!(
            backend = name,
            command = %spec.command,
            args = ?spec.args,
            pid = child.id(),
            "spawned backend process"
        );

        Ok(Self {
            name: name.to_string(),
            transport: LineTransport::new(name, stdin, stdout),
            process: Mutex::new(Some(child)),
            stderr_tail,
        })
    }

    fn stderr_suffix(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .map(|tail| tail.trim().to_string())
            .unwrap_or_default();
        if tail.is_empty() {
            String::new()
        } else {
            format!(" | stderr: {tail}")
        }
    }

    fn invalid(&self, method: &str, reason: impl std::fmt::Display) -> McpError {
        McpError::InvalidResponse {
            server: self.name.clone(),
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Call a list method, following `nextCursor` until exhausted.
    async fn list_paginated<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let mut result = self.transport.call(method, params).await?;

            let page = match result.get_mut(key).map(Value::take) {
                Some(Value::Null) | None => Vec::new(),
                Some(value) => serde_json::from_value::<Vec<T>>(value)
                    .map_err(|e| self.invalid(method, e))?,
            };
            items.extend(page);

            let next = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            match next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn typed_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, McpError> {
        let result = self.transport.call(method, Some(params)).await?;
        serde_json::from_value(result).map_err(|e| self.invalid(method, e))
    }
}

#[async_trait]
impl BackendSession for StdioSession {
    async fn initialize(&self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let handshake = async {
            let result: InitializeResult = self.typed_call("initialize", params).await?;
            self.transport.notify("notifications/initialized", None).await?;
            Ok::<_, McpError>(result)
        };

        match handshake.await {
            Ok(result) => {
                let info = result.server_info.unwrap_or_default();
                tracing::debug!(
                    backend = %self.name,
                    protocol = ?result.protocol_version,
                    server_name = ?info.name,
                    server_version = ?info.version,
                    "handshake complete"
                );
                Ok(())
            }
            Err(e) => Err(McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("{e}{}", self.stderr_suffix()),
            }),
        }
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.list_paginated("tools/list", "tools").await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        self.list_paginated("prompts/list", "prompts").await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.list_paginated("resources/list", "resources").await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let params = named_params(name, arguments);
        let result: CallToolResult = self.typed_call("tools/call", params).await?;
        if result.is_error {
            tracing::debug!(backend = %self.name, tool = name, "tool reported an error result");
        }
        Ok(result)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, McpError> {
        self.typed_call("prompts/get", named_params(name, arguments))
            .await
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.typed_call("resources/read", serde_json::json!({ "uri": uri }))
            .await
    }

    async fn close(&self) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };

        if let Err(e) = child.start_kill() {
            tracing::debug!(backend = %self.name, error = %e, "kill failed (process already exited?)");
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(backend = %self.name, %status, "backend process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %self.name, error = %e, "failed to reap backend process");
            }
            Err(_) => {
                tracing::warn!(backend = %self.name, "timed out reaping backend process");
            }
        }
    }
}

fn named_params(name: &str, arguments: Option<Map<String, Value>>) -> Value {
    let mut params = serde_json::json!({ "name": name });
    if let Some(arguments) = arguments {
        params["arguments"] = Value::Object(arguments);
    }
    params
}

/// Forward backend stderr to the log and keep its most recent bytes.
async fn drain_stderr(name: String, stderr: ChildStderr, tail: Arc<StdMutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(backend = %name, "stderr: {line}");
        if let Ok(mut tail) = tail.lock() {
            tail.push_str(&line);
            tail.push('\n');
            if tail.len() > STDERR_TAIL_LIMIT {
                let mut cut = tail.len() - STDERR_TAIL_LIMIT;
                while !tail.is_char_boundary(cut) {
                    cut += 1;
                }
                tail.drain(..cut);
            }
        }
    }
}

// ─── Launcher ────────────────────────────────────────────────────────────────

/// Launches backends as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl SessionLauncher for StdioLauncher {
    async fn launch(
        &self,
        id: &str,
        spec: &LaunchSpec,
    ) -> Result<Arc<dyn BackendSession>, McpError> {
        let session = StdioSession::spawn(id, spec)?;
        Ok(Arc::new(session))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
