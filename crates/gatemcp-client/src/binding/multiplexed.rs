//! Client side of the multiplexed binding.
//!
//! Every envelope is a `POST` to one endpoint. The first `POST` carries no
//! `Mcp-Session-Id` and is the handshake; the id the server returns rides on
//! every later exchange. Replies come back on the same exchange, either as
//! JSON or as a short SSE body, and are queued for [`Binding::receive`].
//! An optional `GET` attaches the server push stream, and closing sends
//! `DELETE` to terminate the session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use reqwest::{Response, StatusCode, header};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use gatemcp_auth::CredentialProvider;
use gatemcp_protocol::Envelope;
use gatemcp_transport_streamable::{SseParser, headers};
use gatemcp_transport_traits::{
    Binding, BindingFuture, BindingKind, BindingLifecycle, BindingState, CloseReason,
    TransportError, TransportResult,
};

use super::http::{authorize, connection_failed, forward_events, rejects_binding, status_error};

/// Upper bound on the `DELETE` sent when closing.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Multiplexed binding over `reqwest`.
#[derive(Debug)]
pub struct MultiplexedClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Arc<dyn CredentialProvider>,
    lifecycle: BindingLifecycle,
    session_id: RwLock<Option<String>>,
    inbox_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl MultiplexedClient {
    /// Create a binding targeting `endpoint` (for example `http://host:3334/mcp`).
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            http,
            endpoint,
            credentials,
            lifecycle: BindingLifecycle::new(),
            session_id: RwLock::new(None),
            inbox_tx: Mutex::new(Some(tx)),
            inbox_rx: tokio::sync::Mutex::new(rx),
            push_task: Mutex::new(None),
        }
    }

    /// Endpoint this binding posts to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn enqueue(&self, envelope: Envelope) -> TransportResult<()> {
        let guard = self.inbox_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::BindingClosed(CloseReason::Local));
        };
        tx.send(envelope)
            .map_err(|_| TransportError::ConnectionLost("reply queue dropped".into()))
    }

    fn request(&self, method: reqwest::Method) -> TransportResult<reqwest::RequestBuilder> {
        let mut request = self.http.request(method, self.endpoint.clone());
        if let Some(id) = self.session_id.read().as_deref() {
            request = request.header(headers::MCP_SESSION_ID, id);
        }
        authorize(request, &self.credentials)
    }

    fn remember_session(&self, response: &Response) {
        let Some(id) = response
            .headers()
            .get(headers::MCP_SESSION_ID)
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };
        let mut current = self.session_id.write();
        if current.as_deref() != Some(id) {
            info!(session_id = %id, "Multiplexed session established");
            *current = Some(id.to_string());
        }
    }

    async fn queue_reply(&self, response: Response) -> TransportResult<()> {
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(headers::CONTENT_TYPE_SSE));

        let body = response.bytes().await.map_err(connection_failed)?;
        if is_event_stream {
            let mut parser = SseParser::new();
            for event in parser.feed(&body) {
                self.enqueue(event.decode_envelope()?)?;
            }
        } else if !body.is_empty() {
            self.enqueue(Envelope::decode(&body)?)?;
        }
        Ok(())
    }

    /// Attach the server push stream (`GET`). Requires an established session.
    ///
    /// # Errors
    ///
    /// `SessionRequired` before the handshake, or the HTTP failure mapped to a
    /// transport error (a stream that is already attached is reported as
    /// `SendFailed` with status 409).
    pub async fn open_push_stream(&self) -> TransportResult<()> {
        self.lifecycle.ensure_usable()?;
        let session_id = self
            .session_id
            .read()
            .clone()
            .ok_or(TransportError::SessionRequired)?;
        let response = self
            .request(reqwest::Method::GET)?
            .header(header::ACCEPT, headers::CONTENT_TYPE_SSE)
            .send()
            .await
            .map_err(connection_failed)?;
        if !response.status().is_success() {
            return Err(status_error(response, false, Some(&session_id)).await);
        }

        let Some(inbox) = self.inbox_tx.lock().clone() else {
            return Err(TransportError::BindingClosed(CloseReason::Local));
        };
        let task = tokio::spawn(forward_events(
            Box::pin(response.bytes_stream()),
            SseParser::new(),
            Vec::new(),
            inbox,
        ));
        if let Some(previous) = self.push_task.lock().replace(task) {
            previous.abort();
        }
        debug!(session_id = %session_id, "Push stream attached");
        Ok(())
    }

    async fn terminate(&self, session_id: &str) {
        let request = match self.request(reqwest::Method::DELETE) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Skipping session termination");
                return;
            }
        };
        match request.timeout(TERMINATE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                info!(session_id, "Session terminated");
            }
            Ok(response) => {
                debug!(session_id, status = %response.status(), "Terminate not acknowledged");
            }
            Err(err) => warn!(session_id, error = %err, "Terminate request failed"),
        }
    }
}

impl Binding for MultiplexedClient {
    fn kind(&self) -> BindingKind {
        BindingKind::Multiplexed
    }

    fn state(&self) -> BindingState {
        self.lifecycle.state()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn open(&self) -> BindingFuture<'_, ()> {
        // The handshake is the first send
        Box::pin(async move { self.lifecycle.open() })
    }

    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            self.lifecycle.ensure_usable()?;
            let session_id = self.session_id.read().clone();
            let body = envelope.encode()?;
            debug!(session_id = ?session_id, kind = ?envelope.kind(), "POST envelope");

            let response = self
                .request(reqwest::Method::POST)?
                .header(
                    header::ACCEPT,
                    format!("{}, {}", headers::CONTENT_TYPE_JSON, headers::CONTENT_TYPE_SSE),
                )
                .header(header::CONTENT_TYPE, headers::CONTENT_TYPE_JSON)
                .body(body)
                .send()
                .await
                .map_err(connection_failed)?;

            let status = response.status();
            if status == StatusCode::ACCEPTED {
                self.remember_session(&response);
                return Ok(());
            }
            if status.is_success() {
                self.remember_session(&response);
                return self.queue_reply(response).await;
            }

            // Error replies correlated to this request (a rejected initialize,
            // an unknown tool) reach the caller through the normal reply path.
            // Binding-closed and timeout replies are transport failures.
            let handshake = session_id.is_none();
            let correlated = envelope.id().is_some()
                && !rejects_binding(status)
                && !matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);
            if correlated {
                let body = response.bytes().await.map_err(connection_failed)?;
                if let Ok(Envelope::Response(reply)) = Envelope::decode(&body)
                    && reply.id.as_ref() == envelope.id()
                {
                    if let Some(err) = reply.error().and_then(TransportError::from_jsonrpc_error) {
                        warn!(%status, error = %err, "Peer reported a transport failure");
                        return Err(err);
                    }
                    return self.enqueue(Envelope::Response(reply));
                }
                return Err(TransportError::SendFailed(format!("HTTP {status}")));
            }
            Err(status_error(response, handshake, session_id.as_deref()).await)
        })
    }

    fn receive(&self) -> BindingFuture<'_, Option<Envelope>> {
        Box::pin(async move {
            let envelope = self.inbox_rx.lock().await.recv().await;
            if self.lifecycle.is_closed() {
                return Ok(None);
            }
            Ok(envelope)
        })
    }

    fn close(&self, reason: CloseReason) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            if !self.lifecycle.close(reason) {
                return Ok(());
            }
            if let Some(task) = self.push_task.lock().take() {
                task.abort();
            }
            self.inbox_tx.lock().take();

            let session_id = self.session_id.read().clone();
            if let Some(session_id) = session_id {
                self.terminate(&session_id).await;
            }
            debug!(%reason, "Multiplexed binding closed");
            Ok(())
        })
    }
}

impl Drop for MultiplexedClient {
    fn drop(&mut self) {
        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
    }
}
