//! Unauthenticated endpoints: banner, health and token issuing.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::debug;

use gatemcp_auth::TokenRequest;
use gatemcp_transport_streamable::headers;

use crate::router::AppState;

pub(super) async fn root(State(state): State<AppState>) -> String {
    let mut lines = vec![format!(
        "{} {} (authenticated MCP transport)",
        state.config.server_name, state.config.server_version
    )];
    for kind in &state.config.bindings {
        let path = match kind {
            gatemcp_transport_traits::BindingKind::EventStream => {
                &state.config.transport.event_stream_path
            }
            gatemcp_transport_traits::BindingKind::Multiplexed => {
                &state.config.transport.multiplexed_path
            }
        };
        lines.push(format!("{} endpoint: {path}", kind.label()));
    }
    lines.push("Token endpoint: /token".to_string());
    lines.join("\n")
}

pub(super) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}

/// Issue a token. Accepts a JSON or form body; anything unparseable is
/// treated as a request for the default client.
pub(super) async fn token(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let is_json = request_headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(headers::CONTENT_TYPE_JSON));

    let request = if body.is_empty() {
        TokenRequest::default()
    } else if is_json {
        serde_json::from_slice(&body).unwrap_or_default()
    } else {
        let client_id = url::form_urlencoded::parse(&body)
            .find(|(key, _)| key == "client_id")
            .map(|(_, value)| value.into_owned());
        TokenRequest { client_id }
    };
    debug!(client_id = ?request.client_id, "Token requested");

    Json(state.issuer.issue(&request)).into_response()
}
