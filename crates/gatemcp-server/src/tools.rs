//! Tool handlers exposed through `tools/list` and `tools/call`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use gatemcp_protocol::types::{CallToolRequest, CallToolResult, Tool};
use gatemcp_transport_streamable::SessionId;
use gatemcp_transport_traits::BindingKind;

/// Why a tool call failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Arguments do not match the tool's input schema (reported as -32602)
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed (reported in-band with `isError`)
    #[error("{0}")]
    Failed(String),
}

/// What a tool knows about the call it is serving.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Calling session
    pub session_id: SessionId,
    /// Binding the call arrived on
    pub binding_kind: BindingKind,
    /// Client the session authenticated as
    pub client_id: Option<String>,
}

/// Tool handler trait for processing tool calls
#[async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Get the tool definition
    fn tool_definition(&self) -> Tool;

    /// Handle a tool call request
    async fn handle(
        &self,
        request: CallToolRequest,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ToolError>;
}

/// Registered tools, looked up by name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `echo` and `server-info` tools.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(EchoTool);
        registry.register(ServerInfoTool);
        registry
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&self, tool: impl ToolHandler + 'static) {
        let tool: Arc<dyn ToolHandler> = Arc::new(tool);
        let name = tool.tool_definition().name;
        let mut tools = self.tools.write();
        tools.retain(|existing| existing.tool_definition().name != name);
        tools.push(tool);
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .read()
            .iter()
            .map(|tool| tool.tool_definition())
            .collect()
    }

    /// Find a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .read()
            .iter()
            .find(|tool| tool.tool_definition().name == name)
            .cloned()
    }
}

fn input_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object
            .entry("type")
            .or_insert_with(|| Value::String("object".into()));
    }
    value
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(request: CallToolRequest) -> Result<T, ToolError> {
    let arguments = Value::Object(request.arguments.unwrap_or_default());
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// Message to echo back
    message: String,
}

/// Echoes its `message` argument.
///
/// On the multiplexed binding the reply is prefixed with the transport
/// label so clients can tell which binding served them.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn tool_definition(&self) -> Tool {
        Tool {
            name: "echo".to_string(),
            description: Some("Echo back the provided message".to_string()),
            input_schema: input_schema::<EchoArgs>(),
        }
    }

    async fn handle(
        &self,
        request: CallToolRequest,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ToolError> {
        let args: EchoArgs = parse_arguments(request)?;
        let text = match ctx.binding_kind {
            BindingKind::Multiplexed => {
                format!("[{}] {}", ctx.binding_kind.label(), args.message)
            }
            BindingKind::EventStream => args.message,
        };
        Ok(CallToolResult::text(text))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

/// Reports the serving binding and session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerInfoTool;

#[async_trait]
impl ToolHandler for ServerInfoTool {
    fn tool_definition(&self) -> Tool {
        Tool {
            name: "server-info".to_string(),
            description: Some("Get information about the server and the current session".to_string()),
            input_schema: input_schema::<NoArgs>(),
        }
    }

    async fn handle(
        &self,
        _request: CallToolRequest,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ToolError> {
        let mut text = format!(
            "Authentication successful!\nTransport: {}\nSession ID: {}",
            ctx.binding_kind.label(),
            ctx.session_id
        );
        if let Some(client_id) = &ctx.client_id {
            text.push_str(&format!("\nClient ID: {client_id}"));
        }
        Ok(CallToolResult::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(kind: BindingKind) -> ToolContext {
        ToolContext {
            session_id: SessionId::generate(),
            binding_kind: kind,
            client_id: Some("tester".into()),
        }
    }

    fn call(name: &str, arguments: Value) -> CallToolRequest {
        CallToolRequest {
            name: name.into(),
            arguments: arguments.as_object().cloned(),
        }
    }

    #[tokio::test]
    async fn test_echo_prefix_depends_on_binding() {
        let request = call("echo", json!({"message": "hi"}));
        let sse = EchoTool
            .handle(request.clone(), &ctx(BindingKind::EventStream))
            .await
            .unwrap();
        assert_eq!(sse.joined_text(), "hi");

        let http = EchoTool
            .handle(request, &ctx(BindingKind::Multiplexed))
            .await
            .unwrap();
        assert_eq!(http.joined_text(), "[Streamable HTTP] hi");
    }

    #[tokio::test]
    async fn test_echo_requires_message() {
        let err = EchoTool
            .handle(call("echo", json!({})), &ctx(BindingKind::EventStream))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_echo_schema_lists_message() {
        let schema = EchoTool.tool_definition().input_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn test_server_info() {
        let context = ctx(BindingKind::EventStream);
        let result = ServerInfoTool
            .handle(call("server-info", json!({})), &context)
            .await
            .unwrap();
        let text = result.joined_text();
        assert!(text.starts_with("Authentication successful!"));
        assert!(text.contains("Transport: SSE"));
        assert!(text.contains(context.session_id.as_str()));
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let registry = ToolRegistry::with_defaults();
        registry.register(EchoTool);
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["server-info", "echo"]);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
