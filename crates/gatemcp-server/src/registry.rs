//! Session registry.
//!
//! Maps session ids to live sessions. Every close path (explicit terminate,
//! peer disconnect, idle expiry, shutdown) goes through
//! [`SessionRegistry::close`], which removes the entry first and then tears
//! the binding down, so racing closers see exactly one winner.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info};

use gatemcp_transport_streamable::SessionId;
use gatemcp_transport_traits::{Binding, BindingKind, CloseReason, TransportError, TransportResult};

use crate::binding::{EventStreamBinding, MultiplexedBinding, SessionBinding};

/// Where a session is in the MCP lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Only `initialize` and `ping` are accepted
    #[default]
    AwaitingInitialize,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initialized {
        /// Negotiated protocol version
        protocol_version: String,
    },
    /// Fully operational
    Ready {
        /// Negotiated protocol version
        protocol_version: String,
    },
}

impl SessionPhase {
    /// Whether `initialize` has completed.
    pub fn is_initialized(&self) -> bool {
        !matches!(self, Self::AwaitingInitialize)
    }

    /// The negotiated protocol version, once known.
    pub fn protocol_version(&self) -> Option<&str> {
        match self {
            Self::AwaitingInitialize => None,
            Self::Initialized { protocol_version } | Self::Ready { protocol_version } => {
                Some(protocol_version)
            }
        }
    }
}

/// One authenticated logical conversation.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    kind: BindingKind,
    client_id: Option<String>,
    bound_at: DateTime<Utc>,
    last_activity: AtomicI64,
    phase: Mutex<SessionPhase>,
}

impl Session {
    fn new(id: SessionId, kind: BindingKind, client_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            client_id,
            bound_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            phase: Mutex::new(SessionPhase::default()),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Binding variant serving the session.
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Client the authenticating token belonged to.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// When the binding was attached.
    pub fn bound_at(&self) -> DateTime<Utc> {
        self.bound_at
    }

    /// Last inbound or outbound activity.
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or(self.bound_at)
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the last activity.
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity())
            .to_std()
            .unwrap_or_default()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.lock().clone()
    }

    /// Replace the lifecycle phase.
    pub fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
    }
}

/// A registered session with its binding.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
    binding: SessionBinding,
}

impl SessionHandle {
    /// Session id.
    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// Session state.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The session's binding.
    pub fn binding(&self) -> &SessionBinding {
        &self.binding
    }
}

#[derive(Debug)]
struct RegistryInner {
    entries: DashMap<SessionId, SessionHandle>,
    idle_timeout: Duration,
}

/// Concurrent map of live sessions.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry expiring sessions idle for `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                idle_timeout,
            }),
        }
    }

    /// Create a session with a fresh id and an open binding of `kind`.
    pub fn create(&self, kind: BindingKind, client_id: Option<String>) -> SessionHandle {
        loop {
            let id = SessionId::generate();
            // A collision is astronomically unlikely; retry rather than overwrite
            let Entry::Vacant(slot) = self.inner.entries.entry(id.clone()) else {
                continue;
            };

            let binding = match kind {
                BindingKind::EventStream => {
                    SessionBinding::EventStream(Arc::new(EventStreamBinding::new(id.clone())))
                }
                BindingKind::Multiplexed => {
                    SessionBinding::Multiplexed(Arc::new(MultiplexedBinding::new(id.clone())))
                }
            };
            let handle = SessionHandle {
                session: Arc::new(Session::new(id, kind, client_id)),
                binding,
            };
            slot.insert(handle.clone());
            info!(session_id = %handle.id(), binding = %kind, client_id = ?handle.session.client_id(), "Session created");
            return handle;
        }
    }

    /// Find a live session and record activity on it.
    pub fn lookup(&self, id: &str) -> TransportResult<SessionHandle> {
        let handle = self
            .get(id)
            .ok_or_else(|| TransportError::SessionNotFound(id.to_string()))?;
        handle.session.touch();
        Ok(handle)
    }

    /// Find a live session without touching it.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let id = SessionId::parse(id)?;
        self.inner
            .entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.binding.is_closed())
    }

    /// Remove a session and close its binding.
    ///
    /// Returns `true` when this call removed the session. Later calls for
    /// the same id are no-ops.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let Some(id) = SessionId::parse(id) else {
            return false;
        };
        let Some((id, handle)) = self.inner.entries.remove(&id) else {
            return false;
        };
        handle.binding.close_now(reason);
        info!(session_id = %id, %reason, "Session closed");
        true
    }

    /// Close a session on explicit request.
    pub fn terminate(&self, id: &str) -> TransportResult<()> {
        if self.close(id, CloseReason::Terminated) {
            Ok(())
        } else {
            Err(TransportError::SessionNotFound(id.to_string()))
        }
    }

    /// Close every session. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<SessionId> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter()
            .filter(|id| self.close(id.as_str(), reason))
            .count()
    }

    /// Close sessions idle past the timeout, plus any whose binding closed
    /// outside the registry. A session with an attached push stream is not idle.
    pub fn sweep_idle(&self) -> usize {
        let timeout = self.inner.idle_timeout;
        let expired: Vec<SessionId> = self
            .inner
            .entries
            .iter()
            .filter(|entry| {
                let handle = entry.value();
                handle.binding.is_closed()
                    || (!handle.binding.has_live_stream() && handle.session.idle_for() >= timeout)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let closed = expired
            .iter()
            .filter(|id| self.close(id.as_str(), CloseReason::Expired))
            .count();
        if closed > 0 {
            debug!(closed, remaining = self.len(), "Swept idle sessions");
        }
        closed
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Ids of every registered session.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Configured idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(1800))
    }

    #[test]
    fn test_create_and_lookup() {
        let registry = registry();
        let handle = registry.create(BindingKind::Multiplexed, Some("c1".into()));
        let found = registry.lookup(handle.id().as_str()).unwrap();
        assert_eq!(found.id(), handle.id());
        assert_eq!(found.session().kind(), BindingKind::Multiplexed);
        assert_eq!(found.session().client_id(), Some("c1"));
        assert!(matches!(
            registry.lookup("nope"),
            Err(TransportError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.lookup(""),
            Err(TransportError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_close_is_single_shot() {
        let registry = registry();
        let handle = registry.create(BindingKind::EventStream, None);
        let id = handle.id().to_string();
        assert!(registry.close(&id, CloseReason::PeerDisconnected));
        assert!(!registry.close(&id, CloseReason::Terminated));
        assert!(registry.is_empty());
        assert!(handle.binding().is_closed());
        assert!(matches!(
            registry.terminate(&id),
            Err(TransportError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_lookup_hides_closed_binding() {
        let registry = registry();
        let handle = registry.create(BindingKind::Multiplexed, None);
        handle.binding().close_now(CloseReason::Local);
        assert!(registry.lookup(handle.id().as_str()).is_err());
        // The sweeper reclaims the orphaned entry
        assert_eq!(registry.sweep_idle(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_idle() {
        let registry = SessionRegistry::new(Duration::ZERO);
        registry.create(BindingKind::Multiplexed, None);
        let streaming = registry.create(BindingKind::EventStream, None);
        let _rx = streaming
            .binding()
            .as_event_stream()
            .unwrap()
            .take_outbound()
            .unwrap();

        assert_eq!(registry.sweep_idle(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(streaming.id().as_str()).is_some());
    }

    #[test]
    fn test_close_all() {
        let registry = registry();
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let kind = if i % 2 == 0 {
                    BindingKind::EventStream
                } else {
                    BindingKind::Multiplexed
                };
                registry.create(kind, None)
            })
            .collect();
        assert_eq!(registry.close_all(CloseReason::Shutdown), 10);
        assert!(registry.is_empty());
        assert!(handles.iter().all(|h| h.binding().is_closed()));
    }

    #[test]
    fn test_ids_unique_sequential() {
        let registry = registry();
        let mut seen = HashSet::new();
        for _ in 0..100_000 {
            let handle = registry.create(BindingKind::Multiplexed, None);
            assert!(seen.insert(handle.id().clone()));
        }
        assert_eq!(registry.len(), 100_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_ids_unique_concurrent() {
        let registry = registry();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                (0..12_500)
                    .map(|_| registry.create(BindingKind::EventStream, None).id().clone())
                    .collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 100_000);
        assert_eq!(registry.len(), 100_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_closers_have_one_winner() {
        let registry = registry();
        let id = registry
            .create(BindingKind::Multiplexed, None)
            .id()
            .to_string();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let reason = if i % 2 == 0 {
                    CloseReason::Terminated
                } else {
                    CloseReason::PeerDisconnected
                };
                registry.close(&id, reason)
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
