//! Shared HTTP plumbing for the client bindings.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response, StatusCode, header};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gatemcp_auth::CredentialProvider;
use gatemcp_protocol::Envelope;
use gatemcp_transport_streamable::{SseEvent, SseParser, events};
use gatemcp_transport_traits::{TransportError, TransportResult};

/// Attach the bearer credential, failing before any network traffic if none is usable.
pub(crate) fn authorize(
    request: RequestBuilder,
    credentials: &Arc<dyn CredentialProvider>,
) -> TransportResult<RequestBuilder> {
    match credentials.tokens() {
        Some(credential) if credential.is_usable() => {
            Ok(request.header(header::AUTHORIZATION, credential.authorization_header()))
        }
        Some(_) => Err(TransportError::AuthenticationFailed(
            "cached credential is empty or expired".into(),
        )),
        None => Err(TransportError::AuthenticationFailed(
            "no credential available".into(),
        )),
    }
}

pub(crate) fn connection_failed(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::ConnectionFailed(err.to_string())
    } else {
        TransportError::SendFailed(err.to_string())
    }
}

/// Short description of an error body: the envelope's message and sub-code when present.
async fn describe_body(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match Envelope::decode_str(&text) {
        Ok(Envelope::Response(reply)) => match reply.error() {
            Some(error) => match error.data.as_ref().and_then(|d| d.get("error")) {
                Some(code) => format!("{} ({})", error.message, code.as_str().unwrap_or_default()),
                None => error.message.clone(),
            },
            None => status.to_string(),
        },
        _ if text.is_empty() => status.to_string(),
        _ => text,
    }
}

/// Statuses meaning "nothing here speaks this binding".
pub(crate) fn rejects_binding(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND
            | StatusCode::METHOD_NOT_ALLOWED
            | StatusCode::NOT_ACCEPTABLE
            | StatusCode::UNSUPPORTED_MEDIA_TYPE
    )
}

/// Map a non-success status to a transport error.
///
/// During a handshake, [`rejects_binding`] statuses become
/// [`TransportError::NegotiationRejected`] so the orchestrator can fall back.
/// Credential rejections are never treated that way.
pub(crate) async fn status_error(
    response: Response,
    handshake: bool,
    session_id: Option<&str>,
) -> TransportError {
    let status = response.status();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        let detail = describe_body(response).await;
        warn!(%status, %detail, "Credential rejected");
        return TransportError::AuthenticationFailed(detail);
    }
    if handshake && rejects_binding(status) {
        return TransportError::NegotiationRejected {
            status: status.as_u16(),
            message: describe_body(response).await,
        };
    }
    match (status, session_id) {
        (StatusCode::NOT_FOUND, Some(id)) => TransportError::SessionNotFound(id.to_string()),
        (StatusCode::GONE, _) => TransportError::ConnectionLost(describe_body(response).await),
        _ => TransportError::SendFailed(format!("HTTP {status}: {}", describe_body(response).await)),
    }
}

/// Read SSE events off `stream`, forwarding `message` events into `inbox`.
///
/// `pending` holds events already parsed while the caller was looking for
/// the handshake. Returns when the stream ends, fails, or nobody is
/// listening any more.
pub(crate) async fn forward_events<S, B, E>(
    mut stream: S,
    mut parser: SseParser,
    pending: Vec<SseEvent>,
    inbox: mpsc::UnboundedSender<Envelope>,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    if !forward_batch(pending, &inbox) {
        return;
    }
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if !forward_batch(parser.feed(bytes.as_ref()), &inbox) {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "Event stream read failed");
                return;
            }
        }
    }
    debug!("Event stream ended");
}

fn forward_batch(batch: Vec<SseEvent>, inbox: &mpsc::UnboundedSender<Envelope>) -> bool {
    for event in batch {
        if event.event.as_deref().is_some_and(|name| name != events::MESSAGE) {
            debug!(event = ?event.event, "Skipping non-message event");
            continue;
        }
        match event.decode_envelope() {
            Ok(envelope) => {
                if inbox.send(envelope).is_err() {
                    return false;
                }
            }
            Err(err) => warn!(error = %err, "Dropping undecodable event"),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatemcp_auth::{Credential, InMemoryCredentialProvider};
    use gatemcp_protocol::RequestId;

    #[test]
    fn test_authorize_requires_credential() {
        let http = reqwest::Client::new();
        let empty: Arc<dyn CredentialProvider> = Arc::new(InMemoryCredentialProvider::new("c"));
        let err = authorize(http.get("http://localhost/"), &empty).unwrap_err();
        assert!(matches!(err, TransportError::AuthenticationFailed(_)));

        let blank: Arc<dyn CredentialProvider> =
            Arc::new(InMemoryCredentialProvider::new("c").with_tokens(Credential::bearer("")));
        assert!(authorize(http.get("http://localhost/"), &blank).is_err());

        let seeded: Arc<dyn CredentialProvider> = Arc::new(
            InMemoryCredentialProvider::new("c").with_tokens(Credential::bearer("test_token_c")),
        );
        let request = authorize(http.get("http://localhost/"), &seeded)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers()[header::AUTHORIZATION],
            "Bearer test_token_c"
        );
    }

    #[tokio::test]
    async fn test_forward_events_skips_endpoint_and_keeps_order() {
        let body = concat!(
            "event: endpoint\ndata: /sse?sessionId=abc\n\n",
            ": keep-alive\n\n",
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n",
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n",
        );
        // Split mid-event to exercise reassembly
        let (head, tail) = body.split_at(70);
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
            vec![Ok(head.as_bytes().to_vec()), Ok(tail.as_bytes().to_vec())];
        let (tx, mut rx) = mpsc::unbounded_channel();

        forward_events(futures::stream::iter(chunks), SseParser::new(), Vec::new(), tx).await;

        assert_eq!(rx.recv().await.unwrap().id(), Some(&RequestId::Number(1)));
        assert_eq!(rx.recv().await.unwrap().id(), Some(&RequestId::Number(2)));
        assert!(rx.recv().await.is_none());
    }
}
