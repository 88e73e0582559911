//! Connection orchestrator.
//!
//! Picks a binding (explicitly, or by trying multiplexed first and falling
//! back to the event stream when the peer rejects it), runs the `initialize`
//! handshake under one deadline, and then exposes tool discovery and
//! invocation over the chosen binding.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gatemcp_auth::{Credential, InMemoryCredentialProvider};
//! use gatemcp_client::{ConnectOptions, ConnectionOrchestrator};
//!
//! # async fn run() -> gatemcp_client::ClientResult<()> {
//! let credentials = Arc::new(
//!     InMemoryCredentialProvider::new("demo").with_tokens(Credential::bearer("test_token_demo")),
//! );
//! let client = ConnectionOrchestrator::new("http://localhost:3334", credentials)?
//!     .with_options(ConnectOptions::default());
//! client.connect().await?;
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! client.cleanup().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use gatemcp_auth::CredentialProvider;
use gatemcp_protocol::types::{
    CallToolRequest, CallToolResult, Implementation, InitializeRequest, InitializeResult,
    ListToolsResult, Tool,
};
use gatemcp_protocol::{Envelope, JsonRpcResponse, LATEST_PROTOCOL_VERSION, methods};
use gatemcp_transport_traits::{
    Binding, BindingKind, BindingState, CloseReason, ParseBindingKindError, TransportError,
};

use crate::binding::ClientBinding;
use crate::correlator::Correlator;
use crate::error::{ClientError, ClientResult};

/// How the binding is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportPolicy {
    /// Try multiplexed, fall back to the event stream on rejection
    #[default]
    AutoDetect,
    /// Use exactly this binding
    Explicit(BindingKind),
}

impl TransportPolicy {
    /// Bindings to attempt, in order.
    pub fn candidates(&self) -> Vec<BindingKind> {
        match self {
            Self::AutoDetect => vec![BindingKind::Multiplexed, BindingKind::EventStream],
            Self::Explicit(kind) => vec![*kind],
        }
    }
}

impl fmt::Display for TransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoDetect => f.write_str("auto"),
            Self::Explicit(kind) => write!(f, "{kind}"),
        }
    }
}

impl FromStr for TransportPolicy {
    type Err = ParseBindingKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(Self::AutoDetect)
        } else {
            s.parse().map(Self::Explicit)
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Binding selection
    pub policy: TransportPolicy,
    /// Deadline for negotiation plus the `initialize` handshake
    pub timeout: Duration,
    /// Deadline for each later request
    pub request_timeout: Duration,
    /// Identity sent in `initialize`
    pub client_info: Implementation,
    /// Event-stream path relative to the target
    pub event_stream_path: String,
    /// Multiplexed path relative to the target
    pub multiplexed_path: String,
    /// Attach the multiplexed push stream after the handshake
    pub open_push_stream: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            policy: TransportPolicy::AutoDetect,
            timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            client_info: Implementation::new("gatemcp-client", env!("CARGO_PKG_VERSION")),
            event_stream_path: "/sse".to_string(),
            multiplexed_path: "/mcp".to_string(),
            open_push_stream: false,
        }
    }
}

impl ConnectOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the binding policy.
    pub fn with_policy(mut self, policy: TransportPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the connect deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the identity sent in `initialize`.
    pub fn with_client_info(mut self, info: Implementation) -> Self {
        self.client_info = info;
        self
    }

    /// Override both endpoint paths.
    pub fn with_paths(
        mut self,
        event_stream_path: impl Into<String>,
        multiplexed_path: impl Into<String>,
    ) -> Self {
        self.event_stream_path = event_stream_path.into();
        self.multiplexed_path = multiplexed_path.into();
        self
    }

    /// Attach the push stream on multiplexed connections.
    pub fn with_push_stream(mut self, enabled: bool) -> Self {
        self.open_push_stream = enabled;
        self
    }
}

#[derive(Debug)]
struct Active {
    binding: Arc<ClientBinding>,
    reader: Option<JoinHandle<()>>,
}

impl Active {
    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Client connection to one server.
#[derive(Debug)]
pub struct ConnectionOrchestrator {
    target: Url,
    options: ConnectOptions,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
    correlator: Arc<Correlator>,
    active: Mutex<Option<Active>>,
    server: RwLock<Option<InitializeResult>>,
    connecting: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

fn decode_result<T: DeserializeOwned>(method: &str, response: JsonRpcResponse) -> ClientResult<T> {
    match response.into_result() {
        Ok(value) => serde_json::from_value(value)
            .map_err(|e| ClientError::Protocol(format!("{method} result: {e}"))),
        Err(error) => Err(ClientError::Rpc {
            method: method.to_string(),
            error,
        }),
    }
}

impl ConnectionOrchestrator {
    /// Create an orchestrator for the server at `target` (scheme, host and port).
    ///
    /// # Errors
    ///
    /// `InvalidUrl` if `target` does not parse.
    pub fn new(target: &str, credentials: Arc<dyn CredentialProvider>) -> ClientResult<Self> {
        Ok(Self {
            target: Url::parse(target)?,
            options: ConnectOptions::default(),
            credentials,
            http: reqwest::Client::new(),
            correlator: Arc::new(Correlator::new()),
            active: Mutex::new(None),
            server: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the connection options.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Effective options.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// The established binding kind.
    pub fn kind(&self) -> Option<BindingKind> {
        self.established().ok().map(|binding| binding.kind())
    }

    /// Server assigned session id.
    pub fn session_id(&self) -> Option<String> {
        self.established().ok().and_then(|binding| binding.session_id())
    }

    /// `initialize` result, once connected.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().clone()
    }

    /// Whether a binding is established and open.
    pub fn is_connected(&self) -> bool {
        self.established()
            .is_ok_and(|binding| binding.state() == BindingState::Open)
    }

    fn endpoint(&self, kind: BindingKind) -> ClientResult<Url> {
        let path = match kind {
            BindingKind::EventStream => &self.options.event_stream_path,
            BindingKind::Multiplexed => &self.options.multiplexed_path,
        };
        Ok(self.target.join(path)?)
    }

    /// Negotiate a binding and complete the handshake.
    ///
    /// The whole sequence, fallback included, runs under
    /// [`ConnectOptions::timeout`]. On expiry the half-built binding is closed
    /// and the call fails with `ConnectionTimeout`; nothing is retried.
    /// Calling `connect` on an established orchestrator returns the cached
    /// `initialize` result.
    ///
    /// # Errors
    ///
    /// - `Transport(AuthenticationFailed)` when the credential is refused
    /// - `Transport(NegotiationRejected)` when every candidate binding was rejected
    /// - `Transport(ConnectionTimeout)` when the deadline expires
    /// - `Closed` after [`cleanup`](Self::cleanup)
    pub async fn connect(&self) -> ClientResult<InitializeResult> {
        let _serialized = self.connecting.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if let Some(info) = self.server.read().clone() {
            return Ok(info);
        }

        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, self.negotiate()).await {
            Ok(Ok(info)) => {
                *self.server.write() = Some(info.clone());
                info!(
                    binding = ?self.kind(),
                    session_id = ?self.session_id(),
                    server = %info.server_info.name,
                    "Connected"
                );
                Ok(info)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(url = %self.target, ?timeout, "Connection timed out");
                self.abandon();
                Err(TransportError::ConnectionTimeout {
                    operation: "connect".to_string(),
                    timeout,
                }
                .into())
            }
        }
    }

    async fn negotiate(&self) -> ClientResult<InitializeResult> {
        let candidates = self.options.policy.candidates();
        let last = candidates.len().saturating_sub(1);
        for (index, kind) in candidates.into_iter().enumerate() {
            match self.attempt(kind).await {
                Ok(info) => {
                    debug!(binding = %kind, "Binding negotiated");
                    return Ok(info);
                }
                Err(err) if err.is_negotiation_rejection() && index < last => {
                    warn!(binding = %kind, error = %err, "Binding rejected, falling back");
                }
                Err(err) => return Err(err),
            }
        }
        Err(ClientError::NotConnected)
    }

    async fn attempt(&self, kind: BindingKind) -> ClientResult<InitializeResult> {
        debug!(binding = %kind, url = %self.target, "Attempting binding");
        let binding = Arc::new(ClientBinding::new(
            kind,
            self.http.clone(),
            self.endpoint(kind)?,
            Arc::clone(&self.credentials),
        ));
        self.install(Arc::clone(&binding))?;

        let result = self.handshake(&binding).await;
        if result.is_err() {
            if let Some(mut active) = self.uninstall(&binding) {
                active.stop_reader();
            }
            if let Err(err) = binding.close(CloseReason::Local).await {
                debug!(binding = %kind, error = %err, "Close after failed attempt");
            }
        }
        result
    }

    async fn handshake(&self, binding: &Arc<ClientBinding>) -> ClientResult<InitializeResult> {
        binding.open().await?;
        self.spawn_reader(binding);

        let params = InitializeRequest {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: self.options.client_info.clone(),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| ClientError::Protocol(format!("initialize params: {e}")))?;
        let response = self
            .request_on(binding, methods::INITIALIZE, Some(params))
            .await?;
        let result: InitializeResult = decode_result(methods::INITIALIZE, response)?;

        binding
            .send(Envelope::notification(methods::INITIALIZED, None))
            .await?;

        if self.options.open_push_stream
            && let Some(multiplexed) = binding.as_multiplexed()
            && let Err(err) = multiplexed.open_push_stream().await
        {
            warn!(error = %err, "Push stream unavailable");
        }
        Ok(result)
    }

    fn install(&self, binding: Arc<ClientBinding>) -> ClientResult<()> {
        let mut active = self.active.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if let Some(mut previous) = active.replace(Active {
            binding,
            reader: None,
        }) {
            previous.stop_reader();
        }
        Ok(())
    }

    fn uninstall(&self, binding: &Arc<ClientBinding>) -> Option<Active> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if Arc::ptr_eq(&current.binding, binding) => active.take(),
            _ => None,
        }
    }

    /// Close whatever a timed-out negotiation left behind.
    ///
    /// The close runs detached so a hung peer cannot extend the deadline.
    fn abandon(&self) {
        let abandoned = self.active.lock().take();
        if let Some(mut active) = abandoned {
            active.stop_reader();
            let binding = active.binding;
            tokio::spawn(async move {
                if let Err(err) = binding.close(CloseReason::Local).await {
                    debug!(error = %err, "Close after timeout failed");
                }
            });
        }
        self.correlator.fail_all();
    }

    fn spawn_reader(&self, binding: &Arc<ClientBinding>) {
        let reader_binding = Arc::clone(binding);
        let correlator = Arc::clone(&self.correlator);
        let task = tokio::spawn(async move {
            loop {
                match reader_binding.receive().await {
                    Ok(Some(envelope)) => {
                        correlator.resolve(envelope);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "Receive failed");
                        break;
                    }
                }
            }
            let dropped = correlator.fail_all();
            debug!(dropped, "Reader stopped");
        });

        let mut active = self.active.lock();
        match active.as_mut() {
            Some(current) if Arc::ptr_eq(&current.binding, binding) => {
                if let Some(previous) = current.reader.replace(task) {
                    previous.abort();
                }
            }
            _ => task.abort(),
        }
    }

    fn established(&self) -> ClientResult<Arc<ClientBinding>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if self.server.read().is_none() {
            return Err(ClientError::NotConnected);
        }
        self.active
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.binding))
            .ok_or(ClientError::NotConnected)
    }

    async fn request_on(
        &self,
        binding: &ClientBinding,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<JsonRpcResponse> {
        let id = self.correlator.next_id();
        let reply = self.correlator.register(id.clone());

        // One deadline covers both the send and the reply
        let exchange = async {
            binding
                .send(Envelope::request(id.clone(), method, params))
                .await?;
            reply.await.map_err(|_| match binding.state() {
                BindingState::Closed(reason) => TransportError::BindingClosed(reason),
                _ => TransportError::ConnectionLost(format!("no reply to {method}")),
            })
        };

        let timeout = self.options.request_timeout;
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.correlator.forget(&id);
                Err(err.into())
            }
            Err(_) => {
                self.correlator.forget(&id);
                debug!(method, ?timeout, "Request timed out");
                Err(TransportError::RequestTimeout {
                    operation: method.to_string(),
                    timeout,
                }
                .into())
            }
        }
    }

    /// Send one request on the established binding and wait for its reply.
    ///
    /// # Errors
    ///
    /// `NotConnected`/`Closed` without an established binding, or the
    /// transport failure that prevented a reply.
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<JsonRpcResponse> {
        let binding = self.established()?;
        self.request_on(&binding, method, params).await
    }

    /// List the tools the server advertises.
    ///
    /// # Errors
    ///
    /// Transport failures, or `Rpc` if the server answers with an error.
    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        let response = self.request(methods::TOOLS_LIST, None).await?;
        let result: ListToolsResult = decode_result(methods::TOOLS_LIST, response)?;
        Ok(result.tools)
    }

    /// Invoke `tool` with `arguments` (a JSON object, or `null` for none).
    ///
    /// A result flagged `isError` is returned as-is; only protocol level
    /// errors become [`ClientError::RemoteTool`].
    ///
    /// # Errors
    ///
    /// `RemoteTool` with the peer's error object, `Protocol` for
    /// non-object arguments, or any transport failure.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> ClientResult<CallToolResult> {
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(ClientError::Protocol(format!(
                    "tool arguments must be an object, got {other}"
                )));
            }
        };
        let params = serde_json::to_value(CallToolRequest {
            name: tool.to_string(),
            arguments,
        })
        .map_err(|e| ClientError::Protocol(format!("tools/call params: {e}")))?;

        let response = self.request(methods::TOOLS_CALL, Some(params)).await?;
        match response.into_result() {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| ClientError::Protocol(format!("tools/call result: {e}"))),
            Err(error) => Err(ClientError::RemoteTool {
                tool: tool.to_string(),
                error,
            }),
        }
    }

    /// Close the binding and release every pending request.
    ///
    /// Idempotent, and safe before `connect` or while it is still running.
    ///
    /// # Errors
    ///
    /// Only if closing the binding itself fails.
    pub async fn cleanup(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Cleanup already done");
            return Ok(());
        }
        let active = self.active.lock().take();
        if let Some(mut active) = active {
            active.stop_reader();
            active.binding.close(CloseReason::Local).await?;
        }
        let dropped = self.correlator.fail_all();
        info!(url = %self.target, dropped, "Connection cleaned up");
        Ok(())
    }
}

impl Drop for ConnectionOrchestrator {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.lock().take() {
            active.stop_reader();
        }
    }
}
