//! Client side of the event-stream binding.
//!
//! `open()` issues the long-lived `GET` and waits for the `endpoint` event,
//! which names the URL (with `sessionId`) that envelopes are posted to. A
//! reader task then forwards `message` events into the receive queue until
//! either side drops the connection.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use gatemcp_auth::CredentialProvider;
use gatemcp_protocol::Envelope;
use gatemcp_transport_streamable::{SseEvent, SseParser, events, headers};
use gatemcp_transport_traits::{
    Binding, BindingFuture, BindingKind, BindingLifecycle, BindingState, CloseReason,
    TransportError, TransportResult,
};

use super::http::{authorize, connection_failed, forward_events, status_error};

/// Event-stream binding over `reqwest`.
#[derive(Debug)]
pub struct EventStreamClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Arc<dyn CredentialProvider>,
    lifecycle: Arc<BindingLifecycle>,
    session_id: RwLock<Option<String>>,
    post_url: RwLock<Option<Url>>,
    inbox_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Resolve the `endpoint` event payload against the stream URL.
///
/// Accepts a bare path or URL, or a JSON object with a `uri` field.
fn resolve_post_url(base: &Url, data: &str) -> TransportResult<Url> {
    let data = data.trim();
    let target = if data.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| TransportError::Protocol(format!("invalid endpoint event: {e}")))?;
        value
            .get("uri")
            .and_then(|uri| uri.as_str())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Protocol("endpoint event without uri".into()))?
    } else {
        data.to_string()
    };
    base.join(&target)
        .map_err(|e| TransportError::Protocol(format!("invalid endpoint url {target:?}: {e}")))
}

fn session_from_url(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == headers::SESSION_ID_QUERY)
        .map(|(_, value)| value.into_owned())
}

impl EventStreamClient {
    /// Create a binding targeting `endpoint` (for example `http://host:3334/sse`).
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
            lifecycle: Arc::new(BindingLifecycle::new()),
            session_id: RwLock::new(None),
            post_url: RwLock::new(None),
            inbox_tx: Mutex::new(Some(tx)),
            inbox_rx: tokio::sync::Mutex::new(rx),
            reader: Mutex::new(None),
        }
    }

    /// URL announced by the `endpoint` event, once open.
    pub fn post_url(&self) -> Option<Url> {
        self.post_url.read().clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        let request = self
            .http
            .get(self.endpoint.clone())
            .header(header::ACCEPT, headers::CONTENT_TYPE_SSE);
        let response = authorize(request, &self.credentials)?
            .send()
            .await
            .map_err(connection_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(response, true, None).await);
        }
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(headers::CONTENT_TYPE_SSE));
        if !is_event_stream {
            return Err(TransportError::NegotiationRejected {
                status: status.as_u16(),
                message: "response is not an event stream".into(),
            });
        }
        let header_session = response
            .headers()
            .get(headers::MCP_SESSION_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();
        let (endpoint, pending) = loop {
            let Some(chunk) = stream.next().await else {
                return Err(TransportError::ConnectionLost(
                    "stream ended before the endpoint event".into(),
                ));
            };
            let mut batch: Vec<SseEvent> = parser.feed(&chunk.map_err(connection_failed)?);
            if let Some(pos) = batch
                .iter()
                .position(|event| event.event.as_deref() == Some(events::ENDPOINT))
            {
                let endpoint = batch.remove(pos);
                break (endpoint, batch.split_off(pos));
            }
        };

        let post_url = resolve_post_url(&self.endpoint, &endpoint.data)?;
        let session_id = header_session.or_else(|| session_from_url(&post_url));
        info!(session_id = ?session_id, post_url = %post_url, "Event stream opened");
        *self.post_url.write() = Some(post_url);
        *self.session_id.write() = session_id;

        self.lifecycle.open()?;
        let Some(inbox) = self.inbox_tx.lock().take() else {
            return Err(TransportError::BindingClosed(CloseReason::Local));
        };
        let lifecycle = Arc::clone(&self.lifecycle);
        let task = tokio::spawn(async move {
            forward_events(stream, parser, pending, inbox).await;
            if lifecycle.close(CloseReason::PeerDisconnected) {
                info!("Event stream closed by peer");
            }
        });
        *self.reader.lock() = Some(task);
        Ok(())
    }
}

impl Binding for EventStreamClient {
    fn kind(&self) -> BindingKind {
        BindingKind::EventStream
    }

    fn state(&self) -> BindingState {
        self.lifecycle.state()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn open(&self) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            match self.lifecycle.state() {
                BindingState::Open => Ok(()),
                BindingState::Closed(reason) => Err(TransportError::BindingClosed(reason)),
                BindingState::Pending => self.connect().await,
            }
        })
    }

    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            self.lifecycle.ensure_usable()?;
            let post_url = self
                .post_url
                .read()
                .clone()
                .ok_or(TransportError::SessionRequired)?;
            let body = envelope.encode()?;
            debug!(kind = ?envelope.kind(), id = ?envelope.id(), "POST envelope");

            let request = self
                .http
                .post(post_url)
                .header(header::CONTENT_TYPE, headers::CONTENT_TYPE_JSON)
                .body(body);
            let response = authorize(request, &self.credentials)?
                .send()
                .await
                .map_err(connection_failed)?;
            if response.status().is_success() {
                return Ok(());
            }
            let session_id = self.session_id.read().clone();
            Err(status_error(response, false, session_id.as_deref()).await)
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
            // Dropping the stream is how the server learns the session ended
            if let Some(task) = self.reader.lock().take() {
                task.abort();
            }
            self.inbox_tx.lock().take();
            debug!(%reason, "Event-stream binding closed");
            Ok(())
        })
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatemcp_auth::{Credential, InMemoryCredentialProvider};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_post_url_forms() {
        let base = Url::parse("http://127.0.0.1:3334/sse").unwrap();
        let plain = resolve_post_url(&base, "/sse?sessionId=abc").unwrap();
        assert_eq!(plain.as_str(), "http://127.0.0.1:3334/sse?sessionId=abc");
        assert_eq!(session_from_url(&plain).as_deref(), Some("abc"));

        let json = resolve_post_url(&base, r#"{"uri": "/messages?sessionId=xyz"}"#).unwrap();
        assert_eq!(json.path(), "/messages");
        assert_eq!(session_from_url(&json).as_deref(), Some("xyz"));

        let absolute = resolve_post_url(&base, "http://other:1/post").unwrap();
        assert_eq!(absolute.host_str(), Some("other"));

        assert!(resolve_post_url(&base, r#"{"path": "/x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_send_before_open_requires_session() {
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(InMemoryCredentialProvider::new("c").with_tokens(Credential::bearer("t")));
        let binding = EventStreamClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/sse").unwrap(),
            credentials,
        );
        let err = binding
            .send(Envelope::notification("ping", None))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SessionRequired));

        binding.close(CloseReason::Local).await.unwrap();
        assert!(matches!(
            binding.open().await,
            Err(TransportError::BindingClosed(CloseReason::Local))
        ));
        assert_eq!(binding.receive().await.unwrap(), None);
    }
}
