use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use gatemcp_protocol::{CodecError, Envelope, RequestId};
use gatemcp_transport_streamable::SessionId;
use gatemcp_transport_traits::{
    Binding, BindingFuture, BindingKind, BindingLifecycle, BindingState, CloseReason,
    TransportError, TransportResult,
};

use super::Inbox;

/// Multiplexed binding: each send is its own HTTP exchange whose reply
/// travels back on that exchange.
///
/// The router registers the request id of every inbound request before
/// delivering it. When the session pump sends a response with a registered
/// id it completes that exchange; every other outbound envelope goes to the
/// push queue drained by the `GET` stream.
#[derive(Debug)]
pub struct MultiplexedBinding {
    session_id: SessionId,
    lifecycle: BindingLifecycle,
    inbox: Inbox,
    pending: DashMap<RequestId, oneshot::Sender<Envelope>>,
    push_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl MultiplexedBinding {
    /// Create a binding for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            lifecycle: BindingLifecycle::new(),
            inbox: Inbox::new(),
            pending: DashMap::new(),
            push_tx: Mutex::new(Some(tx)),
            push_rx: Mutex::new(Some(rx)),
        }
    }

    /// Reserve the reply slot for request `id`.
    ///
    /// Two in-flight requests with the same id cannot be told apart, so the
    /// second is rejected as an invalid request.
    pub fn register_exchange(&self, id: RequestId) -> TransportResult<oneshot::Receiver<Envelope>> {
        self.lifecycle.ensure_usable()?;
        match self.pending.entry(id) {
            Entry::Occupied(entry) => Err(TransportError::Codec(CodecError::InvalidEnvelope {
                reason: "request id already in flight".to_string(),
                id: Some(entry.key().clone()),
            })),
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Release the reply slot of an exchange that gave up waiting.
    pub fn forget_exchange(&self, id: &RequestId) {
        self.pending.remove(id);
    }

    /// Number of exchanges waiting for a reply.
    pub fn pending_exchanges(&self) -> usize {
        self.pending.len()
    }

    /// Queue an envelope posted by the peer.
    pub fn deliver(&self, envelope: Envelope) -> TransportResult<()> {
        if self.lifecycle.is_closed() {
            return Err(TransportError::SendAfterClose(self.session_id.to_string()));
        }
        self.inbox.push(self.session_id.as_str(), envelope)
    }

    /// Take the push queue for a `GET` stream. `None` while another stream holds it.
    pub fn attach_push(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.push_rx.lock().take()
    }

    /// Hand the push queue back when its stream ends.
    pub fn restore_push(&self, rx: mpsc::UnboundedReceiver<Envelope>) {
        if !self.lifecycle.is_closed() {
            *self.push_rx.lock() = Some(rx);
        }
    }

    /// Whether a `GET` stream currently holds the push queue.
    pub fn has_live_stream(&self) -> bool {
        !self.lifecycle.is_closed() && self.push_rx.lock().is_none()
    }

    /// Close synchronously. Returns `true` only for the first caller.
    pub fn close_now(&self, reason: CloseReason) -> bool {
        if !self.lifecycle.close(reason) {
            return false;
        }
        self.inbox.seal();
        // Dropping the senders wakes every waiting exchange with an error
        self.pending.clear();
        self.push_tx.lock().take();
        debug!(session_id = %self.session_id, %reason, "Multiplexed binding closed");
        true
    }

    fn route_outbound(&self, envelope: Envelope) -> TransportResult<()> {
        self.lifecycle.ensure_usable()?;

        let waiting = match &envelope {
            Envelope::Response(response) => response
                .id
                .as_ref()
                .and_then(|id| self.pending.remove(id))
                .map(|(_, reply)| reply),
            _ => None,
        };
        let envelope = match waiting {
            Some(reply) => match reply.send(envelope) {
                Ok(()) => return Ok(()),
                // Exchange timed out; the peer can still get it on the push stream
                Err(envelope) => envelope,
            },
            None => envelope,
        };

        trace!(session_id = %self.session_id, "Routing envelope to push queue");
        let guard = self.push_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::BindingClosed(CloseReason::Local));
        };
        tx.send(envelope)
            .map_err(|_| TransportError::ConnectionLost("push queue closed".to_string()))
    }
}

impl Binding for MultiplexedBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Multiplexed
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
        Box::pin(async move { self.route_outbound(envelope) })
    }

    fn receive(&self) -> BindingFuture<'_, Option<Envelope>> {
        Box::pin(async move {
            if self.lifecycle.is_closed() {
                return Ok(None);
            }
            let next = self.inbox.next().await;
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
