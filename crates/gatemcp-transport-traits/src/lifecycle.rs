//! At-most-once close guard.

use parking_lot::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::types::{BindingState, CloseReason};

/// State cell shared by every binding implementation.
///
/// Explicit terminate and peer disconnect both call [`BindingLifecycle::close`];
/// exactly one of them observes `true` and runs the teardown.
#[derive(Debug, Default)]
pub struct BindingLifecycle {
    state: Mutex<BindingState>,
}

impl BindingLifecycle {
    /// Create a lifecycle in the `Pending` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> BindingState {
        *self.state.lock()
    }

    /// Whether the binding has closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Move `Pending` to `Open`. Opening twice is a no-op.
    pub fn open(&self) -> TransportResult<()> {
        let mut state = self.state.lock();
        match *state {
            BindingState::Pending => {
                *state = BindingState::Open;
                Ok(())
            }
            BindingState::Open => Ok(()),
            BindingState::Closed(reason) => Err(TransportError::BindingClosed(reason)),
        }
    }

    /// Fail with `BindingClosed` once closed.
    pub fn ensure_usable(&self) -> TransportResult<()> {
        match self.state() {
            BindingState::Closed(reason) => Err(TransportError::BindingClosed(reason)),
            _ => Ok(()),
        }
    }

    /// Transition to `Closed`. Returns `true` only for the first caller.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock();
        if state.is_closed() {
            return false;
        }
        *state = BindingState::Closed(reason);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_close_runs_once() {
        let lifecycle = BindingLifecycle::new();
        lifecycle.open().unwrap();
        assert!(lifecycle.close(CloseReason::Terminated));
        assert!(!lifecycle.close(CloseReason::PeerDisconnected));
        assert_eq!(
            lifecycle.state(),
            BindingState::Closed(CloseReason::Terminated)
        );
    }

    #[test]
    fn test_open_after_close_fails() {
        let lifecycle = BindingLifecycle::new();
        lifecycle.close(CloseReason::Shutdown);
        assert!(matches!(
            lifecycle.open(),
            Err(TransportError::BindingClosed(CloseReason::Shutdown))
        ));
        assert!(lifecycle.ensure_usable().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_has_single_winner() {
        let lifecycle = Arc::new(BindingLifecycle::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..32 {
            let lifecycle = Arc::clone(&lifecycle);
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                let reason = if i % 2 == 0 {
                    CloseReason::Terminated
                } else {
                    CloseReason::PeerDisconnected
                };
                if lifecycle.close(reason) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
