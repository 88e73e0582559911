//! Event-stream binding endpoint.
//!
//! `GET` opens the push stream and creates the session; its first event is
//! `endpoint`, naming the URL the client posts envelopes to. `POST` with
//! `?sessionId=` delivers one envelope and is acknowledged with `202`.

use std::convert::Infallible;

use axum::Extension;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use gatemcp_protocol::Envelope;
use gatemcp_transport_streamable::{SessionId, SseEvent, headers};
use gatemcp_transport_traits::{BindingKind, CloseReason};

use crate::dispatch::spawn_session_pump;
use crate::error::{ErrorReply, ServerError};
use crate::registry::SessionRegistry;
use crate::router::{AppState, Exchange, Route, Verb, sse_frame};

#[derive(Debug, Deserialize)]
pub(super) struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Closes the session when the stream is dropped, which is how a peer
/// disconnect surfaces.
struct DisconnectGuard {
    registry: SessionRegistry,
    session_id: SessionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self
            .registry
            .close(self.session_id.as_str(), CloseReason::PeerDisconnected)
        {
            info!(session_id = %self.session_id, "Event stream disconnected");
        }
    }
}

pub(super) async fn open_stream(
    State(state): State<AppState>,
    Extension(mut exchange): Extension<Exchange>,
) -> Result<Response, ErrorReply> {
    match exchange.route(
        &state.registry,
        BindingKind::EventStream,
        Verb::PushOpen,
        None,
        false,
    )? {
        Route::Handshake => {}
        other => {
            return Err(ServerError::Internal(format!("unexpected route {other:?}")).into());
        }
    }

    let handle = state
        .registry
        .create(BindingKind::EventStream, exchange.client_id());
    let session_id = handle.id().clone();
    let outbound = handle
        .binding()
        .as_event_stream()
        .and_then(|binding| binding.take_outbound());
    let Some(mut outbound) = outbound else {
        state.registry.close(session_id.as_str(), CloseReason::Local);
        return Err(ServerError::Internal("event-stream outbound already taken".into()).into());
    };
    spawn_session_pump(handle, state.dispatcher.clone());
    exchange.finish()?;

    let endpoint = state
        .config
        .transport
        .event_stream_post_url(session_id.as_str());
    let guard = DisconnectGuard {
        registry: state.registry.clone(),
        session_id: session_id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(sse_frame(SseEvent::endpoint(endpoint)));

        while let Some(envelope) = outbound.recv().await {
            match SseEvent::envelope(&envelope) {
                Ok(event) => yield Ok(sse_frame(event)),
                Err(err) => warn!(error = %err, "Dropping unencodable envelope"),
            }
        }
        debug!("Event stream ended");
    };

    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.transport.keep_alive));
    Ok(([(headers::MCP_SESSION_ID, session_id.into_string())], sse).into_response())
}

pub(super) async fn post_message(
    State(state): State<AppState>,
    Extension(mut exchange): Extension<Exchange>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Result<Response, ErrorReply> {
    let handle = match exchange.route(
        &state.registry,
        BindingKind::EventStream,
        Verb::Send,
        query.session_id.as_deref(),
        false,
    )? {
        Route::Deliver(handle) => handle,
        other => {
            return Err(ServerError::Internal(format!("unexpected route {other:?}")).into());
        }
    };

    let envelope = Envelope::decode(&body).map_err(ServerError::from)?;
    debug!(session_id = %handle.id(), kind = ?envelope.kind(), "Envelope posted");
    handle.binding().deliver(envelope)?;
    exchange.finish()?;

    Ok((StatusCode::ACCEPTED, "Accepted").into_response())
}
