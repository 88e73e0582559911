//! Core binding trait.

use std::future::Future;
use std::pin::Pin;

use gatemcp_protocol::Envelope;

use crate::error::TransportResult;
use crate::types::{BindingKind, BindingState, CloseReason};

/// Boxed future returned by [`Binding`] methods.
pub type BindingFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// A live, stateful channel carrying envelopes for one session.
///
/// Guarantees shared by every implementation:
/// - envelopes are delivered in send order per direction
/// - nothing is delivered after `close()`
/// - `send()` on a closed binding fails with `BindingClosed`
pub trait Binding: Send + Sync + std::fmt::Debug {
    /// Which variant this is.
    fn kind(&self) -> BindingKind;

    /// Current lifecycle state.
    fn state(&self) -> BindingState;

    /// Session id the binding is attached to, once known.
    fn session_id(&self) -> Option<String>;

    /// Start carrying traffic.
    fn open(&self) -> BindingFuture<'_, ()>;

    /// Queue one envelope for the peer.
    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()>;

    /// Wait for the next envelope from the peer. `Ok(None)` once closed and drained.
    fn receive(&self) -> BindingFuture<'_, Option<Envelope>>;

    /// Close the binding. Idempotent.
    fn close(&self, reason: CloseReason) -> BindingFuture<'_, ()>;

    /// Returns `true` once the binding has closed.
    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }
}
