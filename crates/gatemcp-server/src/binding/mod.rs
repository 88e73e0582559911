//! Server-side bindings.
//!
//! A binding carries envelopes for exactly one session. Inbound envelopes
//! are queued by the router via `deliver` and consumed by the session pump
//! through [`Binding::receive`]; outbound envelopes go to the peer through
//! [`Binding::send`].

mod event_stream;
mod multiplexed;

pub use event_stream::EventStreamBinding;
pub use multiplexed::MultiplexedBinding;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use gatemcp_protocol::Envelope;
use gatemcp_transport_traits::{
    Binding, BindingFuture, BindingKind, BindingState, CloseReason, TransportError,
    TransportResult,
};

/// Inbound queue shared by both binding variants.
#[derive(Debug)]
struct Inbox {
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn push(&self, session_id: &str, envelope: Envelope) -> TransportResult<()> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| TransportError::SendAfterClose(session_id.to_string())),
            None => Err(TransportError::SendAfterClose(session_id.to_string())),
        }
    }

    async fn next(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }

    /// Drop the sender so a waiting `next` wakes with `None`.
    fn seal(&self) {
        self.tx.lock().take();
    }
}

/// The binding attached to a registered session.
#[derive(Debug, Clone)]
pub enum SessionBinding {
    /// `GET /sse` stream plus `POST /sse?sessionId=` sends
    EventStream(std::sync::Arc<EventStreamBinding>),
    /// `/mcp` with `Mcp-Session-Id`
    Multiplexed(std::sync::Arc<MultiplexedBinding>),
}

impl SessionBinding {
    /// The event-stream binding, if this is one.
    pub fn as_event_stream(&self) -> Option<&EventStreamBinding> {
        match self {
            Self::EventStream(binding) => Some(binding),
            Self::Multiplexed(_) => None,
        }
    }

    /// The multiplexed binding, if this is one.
    pub fn as_multiplexed(&self) -> Option<&MultiplexedBinding> {
        match self {
            Self::Multiplexed(binding) => Some(binding),
            Self::EventStream(_) => None,
        }
    }

    /// Queue an inbound envelope for the session pump.
    pub fn deliver(&self, envelope: Envelope) -> TransportResult<()> {
        match self {
            Self::EventStream(binding) => binding.deliver(envelope),
            Self::Multiplexed(binding) => binding.deliver(envelope),
        }
    }

    /// Close synchronously. Returns `true` only for the call that closed it.
    pub fn close_now(&self, reason: CloseReason) -> bool {
        match self {
            Self::EventStream(binding) => binding.close_now(reason),
            Self::Multiplexed(binding) => binding.close_now(reason),
        }
    }

    /// Whether a push stream is currently attached to a peer.
    pub fn has_live_stream(&self) -> bool {
        match self {
            Self::EventStream(binding) => binding.has_live_stream(),
            Self::Multiplexed(binding) => binding.has_live_stream(),
        }
    }

    fn inner(&self) -> &dyn Binding {
        match self {
            Self::EventStream(binding) => binding.as_ref(),
            Self::Multiplexed(binding) => binding.as_ref(),
        }
    }
}

impl Binding for SessionBinding {
    fn kind(&self) -> BindingKind {
        self.inner().kind()
    }

    fn state(&self) -> BindingState {
        self.inner().state()
    }

    fn session_id(&self) -> Option<String> {
        self.inner().session_id()
    }

    fn open(&self) -> BindingFuture<'_, ()> {
        self.inner().open()
    }

    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()> {
        self.inner().send(envelope)
    }

    fn receive(&self) -> BindingFuture<'_, Option<Envelope>> {
        self.inner().receive()
    }

    fn close(&self, reason: CloseReason) -> BindingFuture<'_, ()> {
        self.inner().close(reason)
    }
}
