//! Registry of live connections with admission control.
//!
//! The registry is the only state shared between sessions. Every
//! operation takes the inner lock, so admission, removal and counting are
//! serialized and the live count can never exceed the configured maximum.

use crate::connection::{Connection, ConnectionId, Outbound};
use crate::error::AdmitError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Registry of admitted connections.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    max_connections: usize,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::with_capacity(max_connections)),
            max_connections,
            next_id: AtomicU64::new(1),
        }
    }

    /// Mint a connection for a new transport session.
    ///
    /// Identities are never reused, so a late duplicate teardown for an old
    /// session can never remove a newer one.
    pub fn candidate(&self, remote_addr: SocketAddr, outbound: Box<dyn Outbound>) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(Connection::new(id, remote_addr, outbound))
    }

    /// Register a candidate if there is room for it.
    ///
    /// A refused candidate is handed back untouched; its outbound handle is
    /// still usable for a final notice.
    pub fn admit(&self, candidate: &Arc<Connection>) -> Result<(), AdmitError> {
        let mut connections = self.lock();
        if connections.len() >= self.max_connections {
            return Err(AdmitError::AtCapacity {
                max: self.max_connections,
            });
        }
        connections.insert(candidate.id(), Arc::clone(candidate));
        trace!(conn_id = %candidate.id(), live = connections.len(), "Admitted");
        Ok(())
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.lock().remove(&id);
        if removed.is_none() {
            trace!(conn_id = %id, "Remove of unknown connection ignored");
        }
        removed
    }

    /// Look up an admitted connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().get(&id).cloned()
    }

    /// Number of admitted connections.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Maximum number of connections allowed.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Deliver `message` to every open connection.
    ///
    /// Works on a snapshot of membership; connections that are not open or
    /// whose send fails are skipped. Returns how many took the message.
    pub fn broadcast(&self, message: &str) -> usize {
        let snapshot: Vec<Arc<Connection>> = self.lock().values().cloned().collect();

        let mut delivered = 0;
        for conn in snapshot {
            match conn.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(conn_id = %conn.id(), error = %e, "Broadcast skipped"),
            }
        }
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{addr, Recorder, RecordingOutbound};
    use crate::connection::ConnEvent;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn candidate(registry: &ConnectionRegistry) -> (Arc<Connection>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let conn = registry.candidate(addr(), Box::new(RecordingOutbound(Arc::clone(&recorder))));
        (conn, recorder)
    }

    #[test]
    fn test_admission_limit() {
        let registry = ConnectionRegistry::new(2);

        let (c1, _) = candidate(&registry);
        let (c2, _) = candidate(&registry);
        let (c3, _) = candidate(&registry);

        registry.admit(&c1).unwrap();
        registry.admit(&c2).unwrap();
        assert_eq!(registry.admit(&c3), Err(AdmitError::AtCapacity { max: 2 }));
        assert_eq!(registry.count(), 2);

        registry.remove(c1.id());
        assert_eq!(registry.count(), 1);
        registry.admit(&c3).unwrap();
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_rejected_candidate_can_still_be_notified() {
        let registry = ConnectionRegistry::new(0);
        let (conn, recorder) = candidate(&registry);

        assert!(registry.admit(&conn).is_err());
        conn.send_notice("full").unwrap();
        assert_eq!(recorder.messages(), vec!["full"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new(4);
        let (c1, _) = candidate(&registry);
        let (c2, _) = candidate(&registry);
        registry.admit(&c1).unwrap();
        registry.admit(&c2).unwrap();

        assert!(registry.remove(c1.id()).is_some());
        assert!(registry.remove(c1.id()).is_none());
        assert_eq!(registry.count(), 1);
        assert!(registry.get(c2.id()).is_some());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ConnectionRegistry::new(1);
        let (c1, _) = candidate(&registry);
        registry.admit(&c1).unwrap();
        registry.remove(c1.id());
        let (c2, _) = candidate(&registry);
        assert_ne!(c1.id(), c2.id());
    }

    #[test]
    fn test_broadcast_skips_non_open() {
        let registry = ConnectionRegistry::new(8);
        let mut recorders = Vec::new();

        for _ in 0..4 {
            let (conn, recorder) = candidate(&registry);
            registry.admit(&conn).unwrap();
            conn.apply(ConnEvent::Admitted).unwrap();
            recorders.push((conn, recorder));
        }
        recorders[3].0.apply(ConnEvent::CloseRequested).unwrap();

        assert_eq!(registry.broadcast("power on"), 3);
        for (conn, recorder) in &recorders[..3] {
            assert_eq!(recorder.messages(), vec!["power on"], "conn {}", conn.id());
        }
        assert!(recorders[3].1.messages().is_empty());
    }

    #[test]
    fn test_broadcast_counts_failed_sends_as_skipped() {
        let registry = ConnectionRegistry::new(2);
        let (good, _) = candidate(&registry);
        let (bad, bad_recorder) = candidate(&registry);
        for conn in [&good, &bad] {
            registry.admit(conn).unwrap();
            conn.apply(ConnEvent::Admitted).unwrap();
        }
        bad_recorder
            .fail_sends
            .store(true, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(registry.broadcast("x"), 1);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        const MAX: usize = 4;
        const THREADS: usize = 32;

        let registry = ConnectionRegistry::new(MAX);
        let admitted = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let (conn, _) = candidate(&registry);
                    barrier.wait();
                    if registry.admit(&conn).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    assert!(registry.count() <= MAX);
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), MAX);
        assert_eq!(registry.count(), MAX);
    }

    #[test]
    fn test_concurrent_churn_never_exceeds_limit() {
        const MAX: usize = 3;
        const THREADS: usize = 16;
        const ROUNDS: usize = 200;

        let registry = ConnectionRegistry::new(MAX);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        let (conn, _) = candidate(&registry);
                        if registry.admit(&conn).is_ok() {
                            assert!(registry.count() <= MAX);
                            assert!(registry.remove(conn.id()).is_some());
                        }
                        assert!(registry.count() <= MAX);
                    }
                });
            }
        });

        assert_eq!(registry.count(), 0);
    }
}
