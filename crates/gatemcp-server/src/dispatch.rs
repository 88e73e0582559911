//! MCP method dispatch and the per-session pump.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use gatemcp_protocol::types::{
    CallToolRequest, CallToolResult, Implementation, InitializeRequest, InitializeResult,
    ListToolsResult, ServerCapabilities, ToolsCapability,
};
use gatemcp_protocol::{
    Envelope, JsonRpcError, JsonRpcNotification, JsonRpcRequest, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS, error_codes, methods,
};
use gatemcp_transport_traits::Binding;

use crate::registry::{Session, SessionHandle, SessionPhase};
use crate::tools::{ToolContext, ToolError, ToolRegistry};

/// Answers MCP requests for a session.
#[derive(Debug)]
pub struct McpDispatcher {
    server_info: Implementation,
    instructions: Option<String>,
    tools: ToolRegistry,
}

impl McpDispatcher {
    /// Create a dispatcher with the built-in tools.
    pub fn new(server_info: Implementation) -> Self {
        Self {
            server_info,
            instructions: None,
            tools: ToolRegistry::with_defaults(),
        }
    }

    /// Replace the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the `instructions` returned from `initialize`.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Registered tools.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one inbound envelope. Returns the reply for requests.
    pub async fn handle(&self, session: &Session, envelope: Envelope) -> Option<Envelope> {
        match envelope {
            Envelope::Request(request) => Some(self.handle_request(session, request).await),
            Envelope::Notification(notification) => {
                self.handle_notification(session, notification);
                None
            }
            Envelope::Response(response) => {
                debug!(session_id = %session.id(), id = ?response.id, "Ignoring unsolicited response");
                None
            }
        }
    }

    async fn handle_request(&self, session: &Session, request: JsonRpcRequest) -> Envelope {
        let JsonRpcRequest { id, method, params } = request;
        let result = match method.as_str() {
            methods::INITIALIZE => self.initialize(session, params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST | methods::TOOLS_CALL if !session.phase().is_initialized() => {
                Err(JsonRpcError::new(
                    error_codes::NOT_INITIALIZED,
                    "Session not initialized",
                ))
            }
            methods::TOOLS_LIST => to_result(&ListToolsResult {
                tools: self.tools.list(),
                next_cursor: None,
            }),
            methods::TOOLS_CALL => self.call_tool(session, params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match result {
            Ok(value) => Envelope::success(id, value),
            Err(error) => {
                debug!(session_id = %session.id(), %method, code = error.code, "Request failed");
                Envelope::error(Some(id), error)
            }
        }
    }

    fn handle_notification(&self, session: &Session, notification: JsonRpcNotification) {
        if notification.method != methods::INITIALIZED {
            debug!(session_id = %session.id(), method = %notification.method, "Ignoring notification");
            return;
        }
        match session.phase() {
            SessionPhase::Initialized { protocol_version } => {
                session.set_phase(SessionPhase::Ready { protocol_version });
            }
            phase => {
                warn!(session_id = %session.id(), ?phase, "Unexpected initialized notification");
            }
        }
    }

    fn initialize(&self, session: &Session, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = parse_params(params)?;
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&request.protocol_version.as_str()) {
            request.protocol_version
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };

        debug!(
            session_id = %session.id(),
            client = %request.client_info.name,
            %protocol_version,
            "Session initialized"
        );
        session.set_phase(SessionPhase::Initialized {
            protocol_version: protocol_version.clone(),
        });

        to_result(&InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    async fn call_tool(&self, session: &Session, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = parse_params(params)?;
        let Some(tool) = self.tools.get(&request.name) else {
            return Err(JsonRpcError::invalid_params(&format!(
                "Unknown tool: {}",
                request.name
            )));
        };

        let ctx = ToolContext {
            session_id: session.id().clone(),
            binding_kind: session.kind(),
            client_id: session.client_id().map(str::to_string),
        };
        let name = request.name.clone();
        match tool.handle(request, &ctx).await {
            Ok(result) => to_result(&result),
            Err(ToolError::InvalidArguments(details)) => {
                Err(JsonRpcError::invalid_params(&details))
            }
            Err(err) => {
                warn!(session_id = %session.id(), tool = %name, error = %err, "Tool failed");
                to_result(&CallToolResult::failure(err.to_string()))
            }
        }
    }
}

fn parse_params<T: for<'de> serde::Deserialize<'de>>(params: Option<Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
}

/// Run the session's receive, dispatch, send loop until the binding closes.
///
/// The pump is the only consumer of the binding's inbound queue, so replies
/// leave in the order requests arrived.
pub fn spawn_session_pump(handle: SessionHandle, dispatcher: Arc<McpDispatcher>) -> JoinHandle<()> {
    let span = info_span!("session", session_id = %handle.id(), binding = %handle.session().kind());
    tokio::spawn(
        async move {
            let binding = handle.binding();
            if let Err(err) = binding.open().await {
                debug!(error = %err, "Binding closed before the pump started");
                return;
            }
            loop {
                let envelope = match binding.receive().await {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "Receive failed");
                        break;
                    }
                };
                handle.session().touch();
                let Some(reply) = dispatcher.handle(handle.session(), envelope).await else {
                    continue;
                };
                if let Err(err) = binding.send(reply).await {
                    debug!(error = %err, "Dropping reply for closed binding");
                    if binding.is_closed() {
                        break;
                    }
                }
            }
            debug!("Session pump finished");
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use gatemcp_protocol::RequestId;
    use gatemcp_transport_traits::BindingKind;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn dispatcher() -> McpDispatcher {
        McpDispatcher::new(Implementation::new("gatemcp-test", "0.0.0"))
    }

    fn session(kind: BindingKind) -> SessionHandle {
        SessionRegistry::new(Duration::from_secs(60)).create(kind, None)
    }

    fn request(id: i64, method: &str, params: Value) -> Envelope {
        Envelope::request(RequestId::Number(id), method, Some(params))
    }

    fn initialize_params() -> Value {
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "1.0"}
        })
    }

    fn error_code(envelope: Option<Envelope>) -> i32 {
        match envelope {
            Some(Envelope::Response(response)) => response.error().map(|e| e.code).unwrap_or(0),
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn result(envelope: Option<Envelope>) -> Value {
        match envelope {
            Some(Envelope::Response(response)) => response.into_result().unwrap(),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tools_require_initialize() {
        let dispatcher = dispatcher();
        let handle = session(BindingKind::EventStream);
        let reply = dispatcher
            .handle(handle.session(), request(1, "tools/list", json!({})))
            .await;
        assert_eq!(error_code(reply), error_codes::NOT_INITIALIZED);

        let pong = dispatcher
            .handle(handle.session(), request(2, "ping", json!({})))
            .await;
        assert_eq!(result(pong), json!({}));
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let dispatcher = dispatcher();
        let handle = session(BindingKind::Multiplexed);
        let value = result(
            dispatcher
                .handle(handle.session(), request(1, "initialize", initialize_params()))
                .await,
        );
        assert_eq!(value["protocolVersion"], "2025-03-26");
        assert_eq!(value["serverInfo"]["name"], "gatemcp-test");
        assert!(value["capabilities"]["tools"].is_object());

        let mut params = initialize_params();
        params["protocolVersion"] = json!("1999-01-01");
        let value = result(
            dispatcher
                .handle(handle.session(), request(2, "initialize", params))
                .await,
        );
        assert_eq!(value["protocolVersion"], LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_initialized_notification_makes_ready() {
        let dispatcher = dispatcher();
        let handle = session(BindingKind::Multiplexed);
        dispatcher
            .handle(handle.session(), request(1, "initialize", initialize_params()))
            .await;
        let reply = dispatcher
            .handle(
                handle.session(),
                Envelope::notification("notifications/initialized", None),
            )
            .await;
        assert!(reply.is_none());
        assert_eq!(
            handle.session().phase(),
            SessionPhase::Ready {
                protocol_version: "2025-03-26".into()
            }
        );
    }

    #[tokio::test]
    async fn test_tool_call_errors() {
        let dispatcher = dispatcher();
        let handle = session(BindingKind::EventStream);
        dispatcher
            .handle(handle.session(), request(1, "initialize", initialize_params()))
            .await;

        let unknown = dispatcher
            .handle(
                handle.session(),
                request(2, "tools/call", json!({"name": "nope"})),
            )
            .await;
        assert_eq!(error_code(unknown), error_codes::INVALID_PARAMS);

        let bad_args = dispatcher
            .handle(
                handle.session(),
                request(3, "tools/call", json!({"name": "echo", "arguments": {}})),
            )
            .await;
        assert_eq!(error_code(bad_args), error_codes::INVALID_PARAMS);

        let missing = dispatcher
            .handle(handle.session(), request(4, "resources/list", json!({})))
            .await;
        assert_eq!(error_code(missing), error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pump_answers_in_order() {
        let dispatcher = Arc::new(dispatcher());
        let handle = session(BindingKind::EventStream);
        let binding = handle.binding().as_event_stream().unwrap();
        let mut outbound = binding.take_outbound().unwrap();
        let pump = spawn_session_pump(handle.clone(), dispatcher);

        binding
            .deliver(request(0, "initialize", initialize_params()))
            .unwrap();
        for i in 1..=20 {
            binding
                .deliver(request(
                    i,
                    "tools/call",
                    json!({"name": "echo", "arguments": {"message": format!("m{i}")}}),
                ))
                .unwrap();
        }

        for i in 0..=20 {
            let reply = outbound.recv().await.unwrap();
            assert_eq!(reply.id(), Some(&RequestId::Number(i)));
        }

        handle.binding().close_now(gatemcp_transport_traits::CloseReason::Terminated);
        pump.await.unwrap();
    }
}
