//! Lifecycle of one backend connection.
//!
//! A `BackendConnection` is created for every configured backend, connected
//! at most once, and torn down at shutdown. Status only moves forward:
//! `created → connecting → running | error`. There is no reconnection.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::McpError;
use super::launch::LaunchSpec;
use super::session::{BackendSession, SessionLauncher};
use super::types::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool};
use crate::config::BackendConfig;

/// Separator between backend identifier and local capability name.
pub const NAMESPACE_SEPARATOR: char = '/';

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle status of a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Created,
    Connecting,
    Running,
    Error,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

struct ConnectionState {
    status: BackendStatus,
    session: Option<Arc<dyn BackendSession>>,
}

// ─── BackendConnection ───────────────────────────────────────────────────────

/// One live or failed connection to a backend server.
pub struct BackendConnection {
    id: String,
    config: BackendConfig,
    connect_timeout: Duration,
    launcher: Arc<dyn SessionLauncher>,
    /// Never held across an await point.
    state: Mutex<ConnectionState>,
}

impl BackendConnection {
    /// Create a connection in the `created` state. The identifier comes from
    /// the config, or a random hex UUID when the config has none.
    pub fn new(
        config: BackendConfig,
        launcher: Arc<dyn SessionLauncher>,
        connect_timeout: Duration,
    ) -> Self {
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Self {
            id,
            config,
            connect_timeout,
            launcher,
            state: Mutex::new(ConnectionState {
                status: BackendStatus::Created,
                session: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn status(&self) -> BackendStatus {
        self.with_state(|state| state.status)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ConnectionState) -> T) -> T {
        // A poisoned lock only means a panic elsewhere; the state itself is
        // always left consistent.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn running_session(&self) -> Option<Arc<dyn BackendSession>> {
        self.with_state(|state| match state.status {
            BackendStatus::Running => state.session.clone(),
            _ => None,
        })
    }

    fn require_session(&self) -> Result<Arc<dyn BackendSession>, McpError> {
        self.running_session().ok_or_else(|| McpError::NotRunning {
            name: self.id.clone(),
        })
    }

    /// Prefix a backend-local name with this backend's identifier.
    pub fn namespaced(&self, local_name: &str) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{local_name}", self.id)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Launch the backend and perform the handshake under the connect timeout.
    ///
    /// Never fails: the outcome is recorded in [`Self::status`]. A connection
    /// that is not `created` is left alone.
    pub async fn connect(&self) {
        let proceed = self.with_state(|state| {
            if state.status == BackendStatus::Created {
                state.status = BackendStatus::Connecting;
                true
            } else {
                false
            }
        });
        if !proceed {
            tracing::debug!(backend = %self.id, status = %self.status(), "connect skipped");
            return;
        }

        let spec = LaunchSpec::from_config(&self.config);
        tracing::info!(
            backend = %self.id,
            command = %spec.command,
            "connecting to backend"
        );

        let session = match self.launcher.launch(&self.id, &spec).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(backend = %self.id, error = %e, "failed to launch backend");
                self.with_state(|state| state.status = BackendStatus::Error);
                return;
            }
        };

        match tokio::time::timeout(self.connect_timeout, session.initialize()).await {
            Ok(Ok(())) => {
                self.with_state(|state| {
                    state.status = BackendStatus::Running;
                    state.session = Some(session);
                });
                tracing::info!(backend = %self.id, "backend connected");
            }
            Ok(Err(e)) => {
                tracing::error!(backend = %self.id, error = %e, "backend handshake failed");
                self.fail(session).await;
            }
            Err(_) => {
                tracing::error!(
                    backend = %self.id,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "backend handshake timed out"
                );
                self.fail(session).await;
            }
        }
    }

    async fn fail(&self, session: Arc<dyn BackendSession>) {
        self.with_state(|state| state.status = BackendStatus::Error);
        session.close().await;
    }

    /// Release the session handle, if any. Idempotent; never fails.
    pub async fn cleanup(&self) {
        let session = self.with_state(|state| state.session.take());
        if let Some(session) = session {
            tracing::debug!(backend = %self.id, "closing backend session");
            session.close().await;
        }
    }

    // ─── Listing ─────────────────────────────────────────────────────────

    /// Tools of this backend with namespaced names. Empty on any failure.
    pub async fn list_tools(&self) -> Vec<Tool> {
        let Some(session) = self.running_session() else {
            return Vec::new();
        };
        match session.list_tools().await {
            Ok(tools) => tools
                .into_iter()
                .map(|tool| Tool {
                    name: self.namespaced(&tool.name),
                    ..tool
                })
                .collect(),
            Err(e) => {
                tracing::warn!(backend = %self.id, error = %e, "error listing tools");
                Vec::new()
            }
        }
    }

    /// Prompts of this backend with namespaced names. Empty on any failure.
    pub async fn list_prompts(&self) -> Vec<Prompt> {
        let Some(session) = self.running_session() else {
            return Vec::new();
        };
        match session.list_prompts().await {
            Ok(prompts) => prompts
                .into_iter()
                .map(|prompt| Prompt {
                    name: self.namespaced(&prompt.name),
                    ..prompt
                })
                .collect(),
            Err(e) => {
                tracing::warn!(backend = %self.id, error = %e, "error listing prompts");
                Vec::new()
            }
        }
    }

    /// Resources of this backend. The display name is namespaced, the URI is
    /// kept as reported. Empty on any failure.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let Some(session) = self.running_session() else {
            return Vec::new();
        };
        match session.list_resources().await {
            Ok(resources) => resources
                .into_iter()
                .map(|resource| Resource {
                    name: self.namespaced(&resource.name),
                    ..resource
                })
                .collect(),
            Err(e) => {
                tracing::warn!(backend = %self.id, error = %e, "error listing resources");
                Vec::new()
            }
        }
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    /// Forward a tool call. Backend failures propagate unchanged.
    pub async fn call_tool(
        &self,
        local_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        self.require_session()?
            .call_tool(local_name, arguments)
            .await
    }

    /// Forward a prompt request. Backend failures propagate unchanged.
    pub async fn get_prompt(
        &self,
        local_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, McpError> {
        self.require_session()?
            .get_prompt(local_name, arguments)
            .await
    }

    /// Forward a resource read. Backend failures propagate unchanged.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.require_session()?.read_resource(uri).await
    }
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("id", &self.id)
            .field("command", &self.config.command)
            .field("status", &self.status())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
