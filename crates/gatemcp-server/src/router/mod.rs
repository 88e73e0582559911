//! HTTP request router.
//!
//! Every exchange on a binding endpoint passes the authentication
//! middleware, then an [`Exchange`] decides which registry or binding
//! operation it maps to. Public endpoints (`/`, `/health`, `/token`) skip
//! the gate.

mod auth;
mod event_stream;
mod exchange;
mod multiplexed;
mod public;

pub use auth::authentication_middleware;
pub use exchange::{Exchange, ExchangeState, Route, Verb};

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Method, header};
use axum::middleware;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gatemcp_auth::{AuthenticationGate, PrefixTokenValidator, TokenIssuer};
use gatemcp_transport_streamable::SseEvent;
use gatemcp_transport_traits::BindingKind;

use crate::config::{ServerConfig, ValidationMode};
use crate::dispatch::McpDispatcher;
use crate::error::ServerError;
use crate::registry::SessionRegistry;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live sessions
    pub registry: SessionRegistry,
    /// MCP method handling
    pub dispatcher: Arc<McpDispatcher>,
    /// Bearer credential check
    pub gate: AuthenticationGate,
    /// Token endpoint backend
    pub issuer: Arc<TokenIssuer>,
    /// Effective configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Assemble state from configuration.
    pub fn new(config: ServerConfig, dispatcher: McpDispatcher) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            config.auth.token_prefix.clone(),
            config.auth.token_ttl(),
        ));
        let gate = match config.auth.validation {
            ValidationMode::Prefix => {
                AuthenticationGate::new(PrefixTokenValidator::new(config.auth.token_prefix.clone()))
            }
            ValidationMode::Issued => AuthenticationGate::from_arc(issuer.clone()),
        };

        Self {
            registry: SessionRegistry::new(config.transport.idle_timeout),
            dispatcher: Arc::new(dispatcher),
            gate,
            issuer,
            config: Arc::new(config),
        }
    }
}

async fn method_not_allowed() -> Response {
    ServerError::MethodNotAllowed.reply(None).into_response()
}

/// Frame an event for a long-lived `Sse` body.
fn sse_frame(event: SseEvent) -> Event {
    let frame = Event::default().data(event.data);
    match event.event {
        Some(name) => frame.event(name),
        None => frame,
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let session_header = HeaderName::from_static("mcp-session-id");
    let version_header = HeaderName::from_static("mcp-protocol-version");
    let last_event_header = HeaderName::from_static("last-event-id");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            session_header.clone(),
            version_header,
            last_event_header,
        ])
        .expose_headers([session_header]);

    if config.cors_allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Build the complete application router.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let mut protected = Router::new();
    if config.serves(BindingKind::EventStream) {
        protected = protected.route(
            &config.transport.event_stream_path,
            get(event_stream::open_stream)
                .post(event_stream::post_message)
                .fallback(method_not_allowed),
        );
    }
    if config.serves(BindingKind::Multiplexed) {
        protected = protected.route(
            &config.transport.multiplexed_path,
            post(multiplexed::send)
                .get(multiplexed::open_push)
                .delete(multiplexed::terminate)
                .fallback(method_not_allowed),
        );
    }
    // route_layer panics on a router without routes
    if !config.bindings.is_empty() {
        protected = protected.route_layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ));
    }

    let public = Router::new()
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .route("/token", post(public::token));

    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    // Enforced by the `Bytes` extractors, oversized bodies get 413
    public
        .merge(protected)
        .layer(DefaultBodyLimit::max(config.transport.max_body_bytes))
        .with_state(state)
        .layer(layers)
}
