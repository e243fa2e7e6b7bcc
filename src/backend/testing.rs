//! In-memory backends for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::errors::McpError;
use super::launch::LaunchSpec;
use super::session::{BackendSession, SessionLauncher};
use super::types::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool};

#[derive(Default)]
struct FakeState {
    tools: Vec<Tool>,
    prompts: Vec<Prompt>,
    resources: Vec<Resource>,
    calls: Vec<String>,
    hang_on_initialize: bool,
    fail_initialize: bool,
    fail_listing: bool,
    fail_calls: bool,
    hang_calls: bool,
    tool_errors: bool,
}

/// Scriptable backend. Clones share state, so a test can keep a handle to
/// inspect what the proxy did with it.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    closed: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn tool(self, name: &str) -> Self {
        let tool = Tool {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: serde_json::json!({"type": "object"}),
            extra: Map::new(),
        };
        self.edit(|s| s.tools.push(tool))
    }

    pub fn prompt(self, name: &str) -> Self {
        let prompt = Prompt {
            name: name.to_string(),
            description: None,
            arguments: None,
            extra: Map::new(),
        };
        self.edit(|s| s.prompts.push(prompt))
    }

    pub fn resource(self, uri: &str, name: &str) -> Self {
        let resource = fake_resource(uri, name);
        self.edit(|s| s.resources.push(resource))
    }

    pub fn hang_on_initialize(self) -> Self {
        self.edit(|s| s.hang_on_initialize = true)
    }

    pub fn fail_initialize(self) -> Self {
        self.edit(|s| s.fail_initialize = true)
    }

    pub fn fail_listing(self) -> Self {
        self.edit(|s| s.fail_listing = true)
    }

    pub fn fail_calls(self) -> Self {
        self.edit(|s| s.fail_calls = true)
    }

    pub fn hang_calls(self) -> Self {
        self.edit(|s| s.hang_calls = true)
    }

    /// Tool calls succeed at the protocol level but report `isError`.
    pub fn tool_errors(self) -> Self {
        self.edit(|s| s.tool_errors = true)
    }

    /// Replace the advertised resources after the fact.
    pub fn set_resources(&self, resources: &[(&str, &str)]) {
        self.state.lock().unwrap().resources = resources
            .iter()
            .map(|(uri, name)| fake_resource(uri, name))
            .collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn record(&self, call: String) -> Result<(), McpError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.hang_calls
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        if state.fail_calls {
            return Err(McpError::ServerError {
                code: -32000,
                message: "backend exploded".into(),
                data: None,
            });
        }
        Ok(())
    }

    fn listing<T: Clone>(&self, pick: impl FnOnce(&FakeState) -> &Vec<T>) -> Result<Vec<T>, McpError> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(McpError::TransportError {
                server: "fake".into(),
                reason: "listing failed".into(),
            });
        }
        Ok(pick(&state).clone())
    }
}

fn fake_resource(uri: &str, name: &str) -> Resource {
    Resource {
        uri: uri.to_string(),
        name: name.to_string(),
        description: None,
        mime_type: Some("text/plain".into()),
        extra: Map::new(),
    }
}

#[async_trait]
impl BackendSession for FakeBackend {
    async fn initialize(&self) -> Result<(), McpError> {
        let (hang, fail) = {
            let state = self.state.lock().unwrap();
            (state.hang_on_initialize, state.fail_initialize)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(McpError::InitFailed {
                name: "fake".into(),
                reason: "handshake rejected".into(),
            });
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.listing(|s| &s.tools)
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        self.listing(|s| &s.prompts)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.listing(|s| &s.resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let args = Value::Object(arguments.unwrap_or_default());
        self.record(format!("call_tool:{name}:{args}")).await?;
        Ok(CallToolResult {
            content: vec![serde_json::json!({"type": "text", "text": format!("{name} {args}")})],
            is_error: self.state.lock().unwrap().tool_errors,
        })
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, McpError> {
        let args = Value::Object(arguments.unwrap_or_default());
        self.record(format!("get_prompt:{name}:{args}")).await?;
        Ok(GetPromptResult {
            description: Some(name.to_string()),
            messages: vec![serde_json::json!({
                "role": "user",
                "content": {"type": "text", "text": args.to_string()},
            })],
            extra: Map::new(),
        })
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.record(format!("read_resource:{uri}")).await?;
        Ok(ReadResourceResult {
            contents: vec![serde_json::json!({"uri": uri, "text": "contents"})],
            extra: Map::new(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out registered fake backends by identifier; unknown identifiers fail
/// to launch as if the process could not be spawned.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    backends: HashMap<String, FakeBackend>,
    launches: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, backend: FakeBackend) -> Self {
        self.backends.insert(id.to_string(), backend);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(
        &self,
        id: &str,
        spec: &LaunchSpec,
    ) -> Result<Arc<dyn BackendSession>, McpError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match self.backends.get(id) {
            Some(backend) => Ok(Arc::new(backend.clone())),
            None => Err(McpError::SpawnFailed {
                name: id.to_string(),
                reason: format!("{}: No such file or directory", spec.command),
            }),
        }
    }
}
