//! Response correlation by request id.
//!
//! A single reader task drains the binding and hands every response to
//! [`Correlator::resolve`]; callers register a oneshot before sending and
//! wait on it. Many requests can be in flight at once and each reply reaches
//! exactly the caller that owns its id.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use gatemcp_protocol::{Envelope, JsonRpcResponse, RequestId};

/// Pending request table plus the id counter.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicI64,
    pending: DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty correlator. Ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate a fresh request id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register interest in the reply to `id`.
    ///
    /// Ids come from [`Correlator::next_id`], so a pending id is never reused.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Drop a registration whose caller gave up.
    pub fn forget(&self, id: &RequestId) {
        self.pending.remove(id);
    }

    /// Route an inbound envelope. Returns `true` if it completed a pending request.
    pub fn resolve(&self, envelope: Envelope) -> bool {
        let Envelope::Response(response) = envelope else {
            trace!(kind = ?envelope.kind(), "Ignoring server-initiated envelope");
            return false;
        };
        let Some(id) = response.id.clone() else {
            debug!(error = ?response.error(), "Response without id");
            return false;
        };
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                debug!(%id, "Response for unknown request");
                false
            }
        }
    }

    /// Number of requests awaiting replies.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop every registration so waiting callers observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let correlator = Correlator::new();
        assert_eq!(correlator.next_id(), RequestId::Number(1));
        assert_eq!(correlator.next_id(), RequestId::Number(2));
    }

    #[tokio::test]
    async fn test_resolve_routes_by_id() {
        let correlator = Correlator::new();
        let first = correlator.register(RequestId::Number(1));
        let second = correlator.register(RequestId::Number(2));

        assert!(correlator.resolve(Envelope::success(RequestId::Number(2), json!("two"))));
        assert!(correlator.resolve(Envelope::success(RequestId::Number(1), json!("one"))));
        assert!(!correlator.resolve(Envelope::success(RequestId::Number(1), json!("again"))));

        assert_eq!(first.await.unwrap().into_result().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().into_result().unwrap(), json!("two"));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_closes_waiters() {
        let correlator = Correlator::new();
        let rx = correlator.register(RequestId::Number(7));
        assert_eq!(correlator.fail_all(), 1);
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_notifications_are_not_correlated() {
        let correlator = Correlator::new();
        let _rx = correlator.register(RequestId::Number(1));
        assert!(!correlator.resolve(Envelope::notification("notifications/message", None)));
        assert_eq!(correlator.pending(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_in_flight_without_cross_delivery() {
        let correlator = Arc::new(Correlator::new());
        let mut waiters = Vec::new();
        for _ in 0..200 {
            let id = correlator.next_id();
            waiters.push((id.clone(), correlator.register(id)));
        }

        let resolver = Arc::clone(&correlator);
        let ids: Vec<_> = waiters.iter().map(|(id, _)| id.clone()).rev().collect();
        tokio::spawn(async move {
            for id in ids {
                let value = json!(id.to_string());
                resolver.resolve(Envelope::success(id, value));
            }
        });

        for (id, rx) in waiters {
            let result = rx.await.unwrap().into_result().unwrap();
            assert_eq!(result, json!(id.to_string()));
        }
    }
}
