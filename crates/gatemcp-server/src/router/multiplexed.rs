//! Multiplexed binding endpoint.
//!
//! One path, three verbs:
//! - `POST` sends one envelope. Without `Mcp-Session-Id` it must be an
//!   `initialize` request and creates the session. Requests are answered on
//!   the same exchange, as JSON or as a one-event SSE body depending on
//!   `Accept`; notifications and responses get `202`.
//! - `GET` attaches the push stream for server-initiated messages.
//! - `DELETE` terminates the session.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Extension;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gatemcp_protocol::{Envelope, EnvelopeKind, methods};
use gatemcp_transport_streamable::{SessionId, SseEncoder, SseEvent, headers};
use gatemcp_transport_traits::{BindingKind, BindingState, CloseReason, TransportError};

use crate::binding::{MultiplexedBinding, SessionBinding};
use crate::dispatch::spawn_session_pump;
use crate::error::{ErrorReply, ServerError};
use crate::registry::SessionHandle;
use crate::router::{AppState, Exchange, Route, Verb, sse_frame};

const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

fn header_session_id(request_headers: &HeaderMap) -> Option<&str> {
    request_headers
        .get(headers::MCP_SESSION_ID)
        .and_then(|value| value.to_str().ok())
}

/// Whether the client ranks `text/event-stream` above JSON.
fn prefers_event_stream(request_headers: &HeaderMap) -> bool {
    let accept = request_headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    match (
        accept.find(headers::CONTENT_TYPE_SSE),
        accept.find(headers::CONTENT_TYPE_JSON),
    ) {
        (Some(sse), Some(json)) => sse < json,
        (Some(_), None) => true,
        _ => false,
    }
}

fn multiplexed(handle: &SessionHandle) -> Result<Arc<MultiplexedBinding>, ErrorReply> {
    match handle.binding() {
        SessionBinding::Multiplexed(binding) => Ok(Arc::clone(binding)),
        SessionBinding::EventStream(_) => {
            Err(ServerError::Internal("session is not multiplexed".into()).into())
        }
    }
}

fn close_reason(binding: &MultiplexedBinding) -> CloseReason {
    use gatemcp_transport_traits::Binding;
    match binding.state() {
        BindingState::Closed(reason) => reason,
        _ => CloseReason::Local,
    }
}

fn encode_reply(
    envelope: &Envelope,
    as_event_stream: bool,
    session_id: &SessionId,
) -> Result<Response, ErrorReply> {
    let session = [(SESSION_HEADER, session_id.as_str().to_string())];
    if as_event_stream {
        let event = SseEvent::envelope(envelope).map_err(ServerError::from)?;
        let body = SseEncoder::encode(&event);
        Ok((
            StatusCode::OK,
            session,
            [(header::CONTENT_TYPE, headers::CONTENT_TYPE_SSE)],
            Body::from(body),
        )
            .into_response())
    } else {
        Ok((StatusCode::OK, session, Json(envelope.to_value())).into_response())
    }
}

pub(super) async fn send(
    State(state): State<AppState>,
    Extension(mut exchange): Extension<Exchange>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ErrorReply> {
    let envelope = Envelope::decode(&body).map_err(ServerError::from)?;
    let initialize = envelope.kind() == EnvelopeKind::Request
        && envelope.method() == Some(methods::INITIALIZE);

    let route = exchange.route(
        &state.registry,
        BindingKind::Multiplexed,
        Verb::Send,
        header_session_id(&request_headers),
        initialize,
    )?;
    let (handle, created) = match route {
        Route::Handshake => {
            let handle = state
                .registry
                .create(BindingKind::Multiplexed, exchange.client_id());
            spawn_session_pump(handle.clone(), state.dispatcher.clone());
            (handle, true)
        }
        Route::Deliver(handle) => (handle, false),
        other => {
            return Err(ServerError::Internal(format!("unexpected route {other:?}")).into());
        }
    };
    let session_id = handle.id().clone();
    let binding = multiplexed(&handle)?;
    let with_session = |reply: ErrorReply| reply.with_header(SESSION_HEADER, session_id.as_str());

    // Notifications and responses are acknowledged without waiting
    let Some(request_id) = envelope.id().cloned().filter(|_| envelope.kind() == EnvelopeKind::Request)
    else {
        binding.deliver(envelope).map_err(|e| with_session(e.into()))?;
        exchange.finish()?;
        return Ok((StatusCode::ACCEPTED, [(SESSION_HEADER, session_id.into_string())]).into_response());
    };

    let method = envelope.method().unwrap_or_default().to_string();
    let reply_rx = binding
        .register_exchange(request_id.clone())
        .map_err(|e| with_session(ServerError::from(e).reply(Some(request_id.clone()))))?;
    if let Err(err) = binding.deliver(envelope) {
        binding.forget_exchange(&request_id);
        return Err(with_session(ServerError::from(err).reply(Some(request_id))));
    }

    let timeout = state.config.transport.request_timeout;
    let reply = match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => {
            let err = TransportError::BindingClosed(close_reason(&binding));
            return Err(with_session(ServerError::from(err).reply(Some(request_id))));
        }
        Err(_) => {
            binding.forget_exchange(&request_id);
            warn!(session_id = %session_id, %method, ?timeout, "Request timed out");
            let err = TransportError::RequestTimeout {
                operation: method,
                timeout,
            };
            return Err(with_session(ServerError::from(err).reply(Some(request_id))));
        }
    };

    let failed_handshake = created
        && matches!(&reply, Envelope::Response(response) if response.error().is_some());
    if failed_handshake {
        // A session whose initialize failed is never handed to the client
        state.registry.close(session_id.as_str(), CloseReason::Local);
        exchange.finish()?;
        return Ok((StatusCode::BAD_REQUEST, Json(reply.to_value())).into_response());
    }

    exchange.finish()?;
    encode_reply(&reply, prefers_event_stream(&request_headers), &session_id)
}

/// Owns the push queue while a `GET` stream is attached and hands it back
/// when the stream is dropped.
struct PushLease {
    binding: Arc<MultiplexedBinding>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl PushLease {
    async fn recv(&mut self) -> Option<Envelope> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for PushLease {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.binding.restore_push(rx);
        }
    }
}

pub(super) async fn open_push(
    State(state): State<AppState>,
    Extension(mut exchange): Extension<Exchange>,
    request_headers: HeaderMap,
) -> Result<Response, ErrorReply> {
    let handle = match exchange.route(
        &state.registry,
        BindingKind::Multiplexed,
        Verb::PushOpen,
        header_session_id(&request_headers),
        false,
    )? {
        Route::OpenPush(handle) => handle,
        other => {
            return Err(ServerError::Internal(format!("unexpected route {other:?}")).into());
        }
    };
    let session_id = handle.id().clone();
    let binding = multiplexed(&handle)?;

    let Some(rx) = binding.attach_push() else {
        return Err(ServerError::Conflict("Push stream already open for this session".into())
            .reply(None)
            .with_header(SESSION_HEADER, session_id.as_str()));
    };
    exchange.finish()?;
    info!(session_id = %session_id, "Push stream attached");

    let mut lease = PushLease {
        binding,
        rx: Some(rx),
    };
    let stream = async_stream::stream! {
        while let Some(envelope) = lease.recv().await {
            match SseEvent::envelope(&envelope) {
                Ok(event) => yield Ok::<Event, Infallible>(sse_frame(event)),
                Err(err) => warn!(error = %err, "Dropping unencodable envelope"),
            }
        }
        debug!("Push stream ended");
    };

    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.transport.keep_alive));
    Ok(([(SESSION_HEADER, session_id.into_string())], sse).into_response())
}

pub(super) async fn terminate(
    State(state): State<AppState>,
    Extension(mut exchange): Extension<Exchange>,
    request_headers: HeaderMap,
) -> Result<Response, ErrorReply> {
    let handle = match exchange.route(
        &state.registry,
        BindingKind::Multiplexed,
        Verb::Terminate,
        header_session_id(&request_headers),
        false,
    )? {
        Route::Terminate(handle) => handle,
        other => {
            return Err(ServerError::Internal(format!("unexpected route {other:?}")).into());
        }
    };

    state.registry.terminate(handle.id().as_str())?;
    exchange.finish()?;
    Ok((StatusCode::OK, Json(json!({"message": "Session terminated"}))).into_response())
}
