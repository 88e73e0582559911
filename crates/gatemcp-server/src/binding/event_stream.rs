use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use gatemcp_protocol::Envelope;
use gatemcp_transport_streamable::SessionId;
use gatemcp_transport_traits::{
    Binding, BindingFuture, BindingKind, BindingLifecycle, BindingState, CloseReason,
    TransportError, TransportResult,
};

use super::Inbox;

/// Event-stream binding: one long-lived push stream, sends arrive as
/// separate posts.
///
/// Outbound envelopes are queued until the HTTP handler takes the receiving
/// end with [`EventStreamBinding::take_outbound`] and streams them as
/// `message` events. Closing drops the sender, so the stream drains what
/// was queued and then ends.
#[derive(Debug)]
pub struct EventStreamBinding {
    session_id: SessionId,
    lifecycle: BindingLifecycle,
    inbox: Inbox,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl EventStreamBinding {
    /// Create a binding for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            lifecycle: BindingLifecycle::new(),
            inbox: Inbox::new(),
            outbound: Mutex::new(Some(tx)),
            outbound_rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the outbound receiver. Only the first call gets it.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.outbound_rx.lock().take()
    }

    /// Queue an envelope posted by the peer.
    pub fn deliver(&self, envelope: Envelope) -> TransportResult<()> {
        if self.lifecycle.is_closed() {
            return Err(TransportError::SendAfterClose(self.session_id.to_string()));
        }
        self.inbox.push(self.session_id.as_str(), envelope)
    }

    /// Close synchronously. Returns `true` only for the first caller.
    pub fn close_now(&self, reason: CloseReason) -> bool {
        if !self.lifecycle.close(reason) {
            return false;
        }
        self.inbox.seal();
        self.outbound.lock().take();
        debug!(session_id = %self.session_id, %reason, "Event-stream binding closed");
        true
    }

    /// Whether the stream has been taken and its reader is still alive.
    pub fn has_live_stream(&self) -> bool {
        self.outbound_rx.lock().is_none()
            && self
                .outbound
                .lock()
                .as_ref()
                .is_some_and(|tx| !tx.is_closed())
    }

    fn push_outbound(&self, envelope: Envelope) -> TransportResult<()> {
        self.lifecycle.ensure_usable()?;
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::BindingClosed(CloseReason::Local));
        };
        tx.send(envelope).map_err(|_| {
            TransportError::ConnectionLost(format!("stream for session {} ended", self.session_id))
        })
    }
}

impl Binding for EventStreamBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::EventStream
    }

    fn state(&self) -> BindingState {
        self.lifecycle.state()
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.to_string())
    }

    fn open(&self) -> BindingFuture<'_, ()> {
        Box::pin(async move { self.lifecycle.open() })
    }

    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            trace!(session_id = %self.session_id, kind = ?envelope.kind(), "Queueing outbound envelope");
            self.push_outbound(envelope)
        })
    }

    fn receive(&self) -> BindingFuture<'_, Option<Envelope>> {
        Box::pin(async move {
            if self.lifecycle.is_closed() {
                return Ok(None);
            }
            let next = self.inbox.next().await;
            // Anything dequeued after close is dropped
            if self.lifecycle.is_closed() {
                return Ok(None);
            }
            Ok(next)
        })
    }

    fn close(&self, reason: CloseReason) -> BindingFuture<'_, ()> {
        Box::pin(async move {
            self.close_now(reason);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatemcp_protocol::RequestId;
    use serde_json::json;

    fn binding() -> EventStreamBinding {
        let binding = EventStreamBinding::new(SessionId::generate());
        binding.lifecycle.open().unwrap();
        binding
    }

    #[tokio::test]
    async fn test_outbound_order_preserved() {
        let binding = binding();
        let mut rx = binding.take_outbound().unwrap();
        assert!(binding.take_outbound().is_none());

        for i in 0..50 {
            binding
                .send(Envelope::success(RequestId::Number(i), json!(i)))
                .await
                .unwrap();
        }
        for i in 0..50 {
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.id(), Some(&RequestId::Number(i)));
        }
    }

    #[tokio::test]
    async fn test_send_after_close_is_binding_closed() {
        let binding = binding();
        assert!(binding.close_now(CloseReason::Terminated));
        let err = binding
            .send(Envelope::notification("ping", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::BindingClosed(CloseReason::Terminated)
        ));
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_drain() {
        let binding = binding();
        let mut rx = binding.take_outbound().unwrap();
        binding
            .send(Envelope::notification("a", None))
            .await
            .unwrap();
        binding.close_now(CloseReason::PeerDisconnected);
        assert_eq!(rx.recv().await.unwrap().method(), Some("a"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_returns_none_once_closed() {
        let binding = std::sync::Arc::new(binding());
        binding
            .deliver(Envelope::notification("x", None))
            .unwrap();
        assert_eq!(
            binding.receive().await.unwrap().unwrap().method(),
            Some("x")
        );

        let waiter = {
            let binding = std::sync::Arc::clone(&binding);
            tokio::spawn(async move { binding.receive().await })
        };
        tokio::task::yield_now().await;
        binding.close_now(CloseReason::Terminated);
        assert!(waiter.await.unwrap().unwrap().is_none());

        assert!(matches!(
            binding.deliver(Envelope::notification("late", None)),
            Err(TransportError::SendAfterClose(_))
        ));
    }

    #[test]
    fn test_live_stream_tracking() {
        let binding = binding();
        assert!(!binding.has_live_stream());
        let rx = binding.take_outbound().unwrap();
        assert!(binding.has_live_stream());
        drop(rx);
        assert!(!binding.has_live_stream());
    }
}
