//! Orchestrator against a live server and against mocked peers.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use gatemcp_auth::{Credential, CredentialProvider, InMemoryCredentialProvider};
use gatemcp_client::{
    ClientError, ConnectOptions, ConnectionOrchestrator, TransportPolicy, fetch_token,
};
use gatemcp_protocol::{LATEST_PROTOCOL_VERSION, error_codes};
use gatemcp_server::{AuthSettings, GateServer, ServerConfig, SessionRegistry, ValidationMode};
use gatemcp_transport_streamable::BindingConfig;
use gatemcp_transport_traits::{BindingKind, CloseReason, TransportError};

const WAIT: Duration = Duration::from_secs(5);

struct LiveServer {
    base: String,
    registry: SessionRegistry,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LiveServer {
    async fn start(config: ServerConfig) -> Self {
        let server = GateServer::new(config.with_bind_address("127.0.0.1:0")).unwrap();
        let registry = server.registry().clone();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));
        Self {
            base: format!("http://{addr}"),
            registry,
            shutdown: Some(tx),
        }
    }

    async fn both() -> Self {
        Self::start(ServerConfig::default()).await
    }
}

impl Drop for LiveServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn credentials(token: &str) -> Arc<dyn CredentialProvider> {
    Arc::new(InMemoryCredentialProvider::new("tester").with_tokens(Credential::bearer(token)))
}

fn client(base: &str, token: &str, policy: TransportPolicy) -> ConnectionOrchestrator {
    ConnectionOrchestrator::new(base, credentials(token))
        .unwrap()
        .with_options(
            ConnectOptions::new()
                .with_policy(policy)
                .with_timeout(WAIT)
                .with_request_timeout(WAIT),
        )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Answers a JSON-RPC request over the multiplexed binding, echoing its id.
struct Reply {
    status: u16,
    payload: Value,
    delay: Duration,
}

impl Reply {
    fn new(status: u16, payload: Value) -> Self {
        Self {
            status,
            payload,
            delay: Duration::ZERO,
        }
    }

    fn initialize() -> Self {
        Self::new(
            200,
            json!({"result": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "mock", "version": "0.0.0"}
            }}),
        )
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Respond for Reply {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .body_json::<Value>()
            .ok()
            .and_then(|body| body.get("id").cloned())
            .unwrap_or(Value::Null);
        let mut body = self.payload.clone();
        body["jsonrpc"] = json!("2.0");
        body["id"] = id;
        ResponseTemplate::new(self.status)
            .insert_header("Mcp-Session-Id", "mock-session")
            .set_body_json(body)
            .set_delay(self.delay)
    }
}

/// Mount a multiplexed peer that completes the handshake; `tools/call` is
/// answered by `call`.
async fn mount_multiplexed_peer(mock: &MockServer, call: Reply) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(Reply::initialize())
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(call)
        .mount(mock)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(mock)
        .await;
}

fn multiplexed_client(base: &str, connect: Duration, request: Duration) -> ConnectionOrchestrator {
    ConnectionOrchestrator::new(base, credentials("test_token_tester"))
        .unwrap()
        .with_options(
            ConnectOptions::new()
                .with_policy(TransportPolicy::Explicit(BindingKind::Multiplexed))
                .with_timeout(connect)
                .with_request_timeout(request),
        )
}

fn first_text(result: &gatemcp_protocol::types::CallToolResult) -> String {
    result.content[0].as_text().unwrap().to_string()
}

#[tokio::test]
async fn test_multiplexed_session_lifecycle() {
    let server = LiveServer::both().await;
    let client = client(
        &server.base,
        "test_token_tester",
        TransportPolicy::Explicit(BindingKind::Multiplexed),
    );

    let info = client.connect().await.unwrap();
    assert_eq!(info.server_info.name, "gatemcp");
    assert_eq!(client.kind(), Some(BindingKind::Multiplexed));
    let session_id = client.session_id().unwrap();
    assert!(server.registry.get(&session_id).is_some());

    let names: Vec<_> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    assert_eq!(names, vec!["echo", "server-info"]);

    let echoed = client.call_tool("echo", json!({"message": "hi"})).await.unwrap();
    assert_eq!(first_text(&echoed), "[Streamable HTTP] hi");

    client.cleanup().await.unwrap();
    assert!(server.registry.is_empty());
    client.cleanup().await.unwrap();
    assert!(matches!(client.list_tools().await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn test_event_stream_session_lifecycle() {
    // Short keep-alive so the server notices the dropped stream quickly
    let config = ServerConfig::default()
        .with_transport(BindingConfig::new().with_keep_alive(Duration::from_secs(1)));
    let server = LiveServer::start(config).await;
    let client = client(
        &server.base,
        "test_token_tester",
        TransportPolicy::Explicit(BindingKind::EventStream),
    );

    client.connect().await.unwrap();
    assert_eq!(client.kind(), Some(BindingKind::EventStream));
    assert_eq!(server.registry.len(), 1);

    let echoed = client.call_tool("echo", json!({"message": "hi"})).await.unwrap();
    assert_eq!(first_text(&echoed), "hi");

    let info = client.call_tool("server-info", json!(null)).await.unwrap();
    assert!(first_text(&info).contains("Transport: SSE"));

    client.cleanup().await.unwrap();
    let registry = server.registry.clone();
    wait_until(move || registry.is_empty()).await;
}

#[tokio::test]
async fn test_auto_detect_prefers_multiplexed() {
    let server = LiveServer::both().await;
    let client = client(&server.base, "test_token_tester", TransportPolicy::AutoDetect);
    client.connect().await.unwrap();
    assert_eq!(client.kind(), Some(BindingKind::Multiplexed));
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_auto_detect_falls_back_to_event_stream() {
    let config = ServerConfig::default().with_bindings(vec![BindingKind::EventStream]);
    let server = LiveServer::start(config).await;
    let client = client(&server.base, "test_token_tester", TransportPolicy::AutoDetect);

    timeout(WAIT, client.connect()).await.unwrap().unwrap();
    assert_eq!(client.kind(), Some(BindingKind::EventStream));

    let echoed = client.call_tool("echo", json!({"message": "fallback"})).await.unwrap();
    assert_eq!(first_text(&echoed), "fallback");
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_rejected_credential_is_not_a_fallback() {
    let server = LiveServer::both().await;
    let client = client(&server.base, "not_a_test_token", TransportPolicy::AutoDetect);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_authentication(), "{err}");
    assert!(!err.is_negotiation_rejection());
    assert!(err.to_string().contains("invalid_token"));
    assert!(server.registry.is_empty());
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_mock_does_not_fall_back() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32000, "message": "Authorization header is required", "data": {"error": "missing_token"}}
        })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let client = client(&mock.uri(), "test_token_tester", TransportPolicy::AutoDetect);
    let err = client.connect().await.unwrap_err();
    assert!(err.is_authentication(), "{err}");
}

#[tokio::test]
async fn test_all_bindings_rejected() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock)
        .await;

    let client = client(&mock.uri(), "test_token_tester", TransportPolicy::AutoDetect);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::NegotiationRejected { status: 404, .. })
    ));
    assert_eq!(client.kind(), None);
}

#[tokio::test]
async fn test_connect_timeout_releases_binding() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock)
        .await;

    let client = ConnectionOrchestrator::new(&mock.uri(), credentials("test_token_tester"))
        .unwrap()
        .with_options(
            ConnectOptions::new()
                .with_policy(TransportPolicy::AutoDetect)
                .with_timeout(Duration::from_millis(200)),
        );

    let started = std::time::Instant::now();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::ConnectionTimeout { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!client.is_connected());
    client.cleanup().await.unwrap();
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_connect_deadline_holds_after_session_is_assigned() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(Reply::initialize())
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(8)))
        .mount(&mock)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(8)))
        .mount(&mock)
        .await;

    let client = multiplexed_client(&mock.uri(), Duration::from_millis(500), WAIT);
    let started = std::time::Instant::now();
    let err = client.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, ClientError::Transport(TransportError::ConnectionTimeout { .. })),
        "{err}"
    );
    assert!(elapsed < Duration::from_secs(2), "connect took {elapsed:?}");
    assert!(!client.is_connected());

    // The session is still terminated, just not on the caller's clock
    timeout(WAIT, async {
        loop {
            let requests = mock.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.method.as_str() == "DELETE") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session was never terminated");
}

#[tokio::test]
async fn test_request_timeout_covers_slow_multiplexed_post() {
    let mock = MockServer::start().await;
    mount_multiplexed_peer(
        &mock,
        Reply::new(200, json!({"result": {"content": []}})).delayed(Duration::from_secs(8)),
    )
    .await;

    let client = multiplexed_client(&mock.uri(), WAIT, Duration::from_millis(500));
    client.connect().await.unwrap();

    let started = std::time::Instant::now();
    let err = client.call_tool("echo", json!({})).await.unwrap_err();
    let elapsed = started.elapsed();
    match err {
        ClientError::Transport(TransportError::RequestTimeout { operation, timeout }) => {
            assert_eq!(operation, "tools/call");
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected RequestTimeout, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(3), "call took {elapsed:?}");
    assert!(client.is_connected());
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_binding_closed_reply_is_a_transport_failure() {
    let mock = MockServer::start().await;
    mount_multiplexed_peer(
        &mock,
        Reply::new(
            410,
            json!({"error": {
                "code": error_codes::BINDING_CLOSED,
                "message": "Binding closed: expired",
                "data": {"reason": "expired"}
            }}),
        ),
    )
    .await;

    let client = multiplexed_client(&mock.uri(), WAIT, WAIT);
    client.connect().await.unwrap();
    let err = client.call_tool("echo", json!({})).await.unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::Transport(TransportError::BindingClosed(CloseReason::Expired))
        ),
        "{err:?}"
    );
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_server_timeout_reply_is_a_transport_failure() {
    let mock = MockServer::start().await;
    mount_multiplexed_peer(
        &mock,
        Reply::new(
            504,
            json!({"error": {
                "code": error_codes::REQUEST_TIMEOUT,
                "message": "Request timed out",
                "data": {"operation": "tools/call", "timeout_ms": 250}
            }}),
        ),
    )
    .await;

    let client = multiplexed_client(&mock.uri(), WAIT, WAIT);
    client.connect().await.unwrap();
    match client.call_tool("echo", json!({})).await {
        Err(ClientError::Transport(TransportError::RequestTimeout { operation, timeout })) => {
            assert_eq!(operation, "tools/call");
            assert_eq!(timeout, Duration::from_millis(250));
        }
        other => panic!("expected RequestTimeout, got {other:?}"),
    }
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_remote_tool_errors_pass_through() {
    let server = LiveServer::both().await;
    let client = client(&server.base, "test_token_tester", TransportPolicy::AutoDetect);
    client.connect().await.unwrap();

    match client.call_tool("does-not-exist", json!({})).await {
        Err(ClientError::RemoteTool { tool, error }) => {
            assert_eq!(tool, "does-not-exist");
            assert_eq!(error.code, error_codes::INVALID_PARAMS);
            assert!(error.message.contains("Unknown tool"));
        }
        other => panic!("expected RemoteTool, got {other:?}"),
    }

    let err = client.call_tool("echo", json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let server = LiveServer::both().await;
    for kind in [BindingKind::Multiplexed, BindingKind::EventStream] {
        let client = Arc::new(client(
            &server.base,
            "test_token_tester",
            TransportPolicy::Explicit(kind),
        ));
        client.connect().await.unwrap();

        let mut calls = Vec::new();
        for i in 0..25 {
            let client = Arc::clone(&client);
            calls.push(tokio::spawn(async move {
                let message = format!("call-{i}");
                let result = client
                    .call_tool("echo", json!({"message": message}))
                    .await
                    .unwrap();
                (message, first_text(&result))
            }));
        }
        for call in calls {
            let (sent, received) = timeout(WAIT, call).await.unwrap().unwrap();
            assert!(received.ends_with(&sent), "{kind}: {received} vs {sent}");
        }
        client.cleanup().await.unwrap();
    }
}

#[tokio::test]
async fn test_push_stream_attaches() {
    let server = LiveServer::both().await;
    let client = ConnectionOrchestrator::new(&server.base, credentials("test_token_tester"))
        .unwrap()
        .with_options(
            ConnectOptions::new()
                .with_policy(TransportPolicy::Explicit(BindingKind::Multiplexed))
                .with_push_stream(true)
                .with_timeout(WAIT),
        );
    client.connect().await.unwrap();
    let session_id = client.session_id().unwrap();
    let binding = server.registry.get(&session_id).unwrap().binding().clone();
    wait_until(move || binding.has_live_stream()).await;
    client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_fetched_token_opens_issued_server() {
    let config = ServerConfig::default().with_auth(AuthSettings {
        validation: ValidationMode::Issued,
        ..AuthSettings::default()
    });
    let server = LiveServer::start(config).await;

    let provider = Arc::new(InMemoryCredentialProvider::new("abc"));
    let token_url = url::Url::parse(&format!("{}/token", server.base)).unwrap();
    let credential = fetch_token(&reqwest::Client::new(), &token_url, Some("abc"), provider.as_ref())
        .await
        .unwrap();
    assert_eq!(credential.access_token, "test_token_abc");
    assert_eq!(credential.client_id.as_deref(), Some("abc"));
    assert!(credential.expires_at.is_some());
    assert_eq!(provider.tokens().unwrap(), credential);

    let client = ConnectionOrchestrator::new(&server.base, provider)
        .unwrap()
        .with_options(ConnectOptions::new().with_timeout(WAIT));
    client.connect().await.unwrap();
    assert_eq!(client.list_tools().await.unwrap().len(), 2);
    client.cleanup().await.unwrap();
}
