//! ProxySession: the single logical session presented to the frontend.
//!
//! Composes the routing table and the aggregator, and owns collective
//! connect/disconnect. This is the API a frontend adapter calls.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{
    BackendConnection, BackendStatus, CallToolResult, Content, GetPromptResult, Prompt, ReadResourceResult,
    Resource, SessionLauncher, StdioLauncher, Tool,
};
use crate::config::{BackendConfig, ProxyConfig, ProxyOptions};

use super::aggregator::Aggregator;
use super::errors::ProxyError;
use super::router::Router;

/// Status of one backend, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendReport {
    pub id: String,
    pub status: BackendStatus,
}

/// Aggregating proxy over every configured backend.
#[derive(Debug)]
pub struct ProxySession {
    router: Router,
    aggregator: Aggregator,
    options: ProxyOptions,
}

impl ProxySession {
    /// Build a proxy whose backends are launched by `launcher`.
    ///
    /// Fails on duplicate or invalid identifiers; no backend is contacted.
    pub fn new(
        configs: Vec<BackendConfig>,
        launcher: Arc<dyn SessionLauncher>,
        options: ProxyOptions,
    ) -> Result<Self, ProxyError> {
        let backends = configs
            .into_iter()
            .map(|config| {
                BackendConnection::new(config, Arc::clone(&launcher), options.connect_timeout)
            })
            .collect();
        let router = Router::new(backends)?;

        tracing::info!(
            backends = router.len(),
            ids = ?router.iter().map(|b| b.id()).collect::<Vec<_>>(),
            "proxy session created"
        );

        Ok(Self {
            router,
            aggregator: Aggregator::new(),
            options,
        })
    }

    /// Build a proxy over subprocess-stdio backends.
    pub fn from_config(config: ProxyConfig, options: ProxyOptions) -> Result<Self, ProxyError> {
        Self::new(config.servers, Arc::new(StdioLauncher), options)
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect every backend concurrently, waiting at most
    /// `connect_all_timeout`. Individual failures only show up in
    /// [`Self::status`].
    pub async fn connect_all(&self) {
        let deadline = self.options.connect_all_timeout;
        let attempts = join_all(self.router.iter().map(|backend| backend.connect()));

        if tokio::time::timeout(deadline, attempts).await.is_err() {
            let unsettled: Vec<&str> = self
                .router
                .iter()
                .filter(|b| matches!(b.status(), BackendStatus::Created | BackendStatus::Connecting))
                .map(|b| b.id())
                .collect();
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                unsettled = ?unsettled,
                "collective connect deadline elapsed"
            );
        }

        let running = self
            .router
            .iter()
            .filter(|b| b.status() == BackendStatus::Running)
            .count();
        tracing::info!(
            running,
            total = self.router.len(),
            "backend connection phase finished"
        );
    }

    /// Tear every backend down concurrently under `disconnect_timeout`.
    /// Never fails and never hangs past the deadline.
    pub async fn disconnect_all(&self) {
        let deadline = self.options.disconnect_timeout;
        let cleanups = join_all(self.router.iter().map(|backend| backend.cleanup()));

        match tokio::time::timeout(deadline, cleanups).await {
            Ok(_) => tracing::info!("all backends disconnected"),
            Err(_) => tracing::error!(
                deadline_ms = deadline.as_millis() as u64,
                "timed out disconnecting backends"
            ),
        }
    }

    /// `{id, status}` for every backend in configuration order.
    pub fn status(&self) -> Vec<BackendReport> {
        self.router
            .iter()
            .map(|backend| BackendReport {
                id: backend.id().to_string(),
                status: backend.status(),
            })
            .collect()
    }

    // ─── Listing ─────────────────────────────────────────────────────────

    pub async fn list_tools(&self) -> Vec<Tool> {
        self.aggregator.list_tools(&self.router).await
    }

    pub async fn list_prompts(&self) -> Vec<Prompt> {
        self.aggregator.list_prompts(&self.router).await
    }

    /// Also refreshes the resource ownership table used by
    /// [`Self::read_resource`].
    pub async fn list_resources(&self) -> Vec<Resource> {
        self.aggregator.list_resources(&self.router).await
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    /// Route `backend/tool` to its backend and return the content unmodified.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Vec<Content>, ProxyError> {
        Ok(self.call_tool_result(name, arguments).await?.content)
    }

    /// Like [`Self::call_tool`], keeping the backend's `isError` flag.
    pub async fn call_tool_result(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ProxyError> {
        let (backend, tool) = self.router.resolve(name)?;
        tracing::info!(backend = %backend.id(), tool, "calling tool");
        Ok(backend.call_tool(tool, arguments).await?)
    }

    /// Route `backend/prompt` to its backend and return the result unmodified.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, ProxyError> {
        let (backend, prompt) = self.router.resolve(name)?;
        tracing::info!(backend = %backend.id(), prompt, "getting prompt");
        Ok(backend.get_prompt(prompt, arguments).await?)
    }

    /// Read a resource from the backend that last listed it.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ProxyError> {
        let unknown = || ProxyError::UnknownResource {
            uri: uri.to_string(),
        };
        let owner = self.aggregator.owner_of(uri).ok_or_else(unknown)?;
        let backend = self.router.get(&owner).ok_or_else(unknown)?;
        tracing::info!(backend = %backend.id(), uri, "reading resource");
        Ok(backend.read_resource(uri).await?)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
