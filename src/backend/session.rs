//! Capability interface the proxy core depends on.
//!
//! A `SessionLauncher` acquires a transport to one backend; the resulting
//! `BackendSession` performs the handshake and serves the capability calls.
//! One implementation exists per transport kind (see [`super::stdio`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::errors::McpError;
use super::launch::LaunchSpec;
use super::types::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool};

/// A live session with one backend server.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Perform the protocol handshake.
    async fn initialize(&self) -> Result<(), McpError>;

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError>;

    /// Invoke a tool by its backend-local name. A tool-level failure is a
    /// successful result with `is_error` set.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError>;

    /// Render a prompt by its backend-local name.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, McpError>;

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError>;

    /// Release the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Acquires a transport to a backend without handshaking.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(
        &self,
        id: &str,
        spec: &LaunchSpec,
    ) -> Result<Arc<dyn BackendSession>, McpError>;
}
