//! The WebSocket connection pool (C4): admission, the three-way index,
//! broadcast fan-out, and slow-consumer eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{ClientHandle, MemoryEvent, OutboundMessage};

/// Outcome of attempting to admit a new client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The client was admitted.
    Ok,
    /// The pool is at `max_connections` capacity.
    Full,
}

/// Point-in-time pool statistics, returned by the `/ws/status` management endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolMetrics {
    /// Currently connected clients.
    pub active: usize,
    /// Clients ever admitted, including since-removed ones.
    pub total_ever: u64,
    /// Clients evicted for being slow consumers.
    pub evictions: u64,
    /// Remaining admission capacity.
    pub available_capacity: usize,
}

/// Thread-safe registry of connected WebSocket clients, indexed by id,
/// repository, and session. A client is present in all three indexes or
/// none — every mutating operation maintains that invariant before
/// returning.
pub struct ConnectionPool {
    by_id: DashMap<String, Arc<ClientHandle>>,
    by_repository: DashMap<String, DashSet<String>>,
    by_session: DashMap<String, DashSet<String>>,
    max_connections: usize,
    total_ever: AtomicU64,
    evictions: AtomicU64,
}

impl ConnectionPool {
    /// Build a pool admitting at most `max_connections` concurrent clients.
    pub fn new(max_connections: usize) -> Self {
        Self {
            by_id: DashMap::new(),
            by_repository: DashMap::new(),
            by_session: DashMap::new(),
            max_connections,
            total_ever: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Admit `client` if capacity allows, inserting it into all three
    /// indexes atomically with respect to observers of this pool.
    pub fn add(&self, client: Arc<ClientHandle>) -> Admission {
        if self.by_id.len() >= self.max_connections {
            return Admission::Full;
        }

        self.by_repository
            .entry(client.repository.clone())
            .or_default()
            .insert(client.id.clone());
        self.by_session
            .entry(client.session_id.clone())
            .or_default()
            .insert(client.id.clone());
        self.by_id.insert(client.id.clone(), client);
        self.total_ever.fetch_add(1, Ordering::Relaxed);
        Admission::Ok
    }

    /// Remove a client by id. Idempotent: removing an unknown id is a no-op.
    pub fn remove(&self, client_id: &str) {
        if let Some((_, client)) = self.by_id.remove(client_id) {
            if let Some(set) = self.by_repository.get(&client.repository) {
                set.remove(client_id);
            }
            if let Some(set) = self.by_session.get(&client.session_id) {
                set.remove(client_id);
            }
        }
    }

    /// Look up a client by id.
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.by_id.get(client_id).map(|entry| entry.value().clone())
    }

    /// All clients scoped to `repository`.
    pub fn get_by_repository(&self, repository: &str) -> Vec<Arc<ClientHandle>> {
        self.by_repository
            .get(repository)
            .map(|set| set.iter().filter_map(|id| self.get(&id)).collect())
            .unwrap_or_default()
    }

    /// All clients scoped to `session_id`.
    pub fn get_by_session(&self, session_id: &str) -> Vec<Arc<ClientHandle>> {
        self.by_session
            .get(session_id)
            .map(|set| set.iter().filter_map(|id| self.get(&id)).collect())
            .unwrap_or_default()
    }

    /// Every connected client.
    pub fn get_all(&self) -> Vec<Arc<ClientHandle>> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Fan out `event` to every connected client. Clients whose outbound
    /// queue is full are marked laggy; a second consecutive full
    /// enqueue evicts and closes them (the slow-consumer policy).
    ///
    /// Returns the number of clients the event was actually delivered to.
    pub fn broadcast(&self, event: &MemoryEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(error) => {
                warn!(%error, "failed to serialize broadcast event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut to_evict = Vec::new();

        for entry in self.by_id.iter() {
            let client = entry.value();
            match client.outbound.try_send(OutboundMessage(payload.clone())) {
                Ok(()) => {
                    client.record_delivered();
                    delivered += 1;
                }
                Err(_full_or_closed) => {
                    if client.record_full_attempt() {
                        to_evict.push(client.id.clone());
                    } else {
                        debug!(client_id = %client.id, "client outbound queue full, marking laggy");
                    }
                }
            }
        }

        for id in to_evict {
            warn!(client_id = %id, "evicting slow consumer");
            self.remove(&id);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        delivered
    }

    /// Snapshot metrics for the `/ws/status` management endpoint.
    pub fn metrics(&self) -> PoolMetrics {
        let active = self.by_id.len();
        PoolMetrics {
            active,
            total_ever: self.total_ever.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            available_capacity: self.max_connections.saturating_sub(active),
        }
    }

    /// Whether a client is present in all three indexes (used by tests
    /// to assert the "all or none" invariant).
    #[cfg(test)]
    fn indexed_everywhere(&self, client_id: &str, repository: &str, session_id: &str) -> bool {
        self.by_id.contains_key(client_id)
            && self
                .by_repository
                .get(repository)
                .map(|s| s.contains(client_id))
                .unwrap_or(false)
            && self
                .by_session
                .get(session_id)
                .map(|s| s.contains(client_id))
                .unwrap_or(false)
    }

    #[cfg(test)]
    fn indexed_nowhere(&self, client_id: &str, repository: &str, session_id: &str) -> bool {
        !self.by_id.contains_key(client_id)
            && !self
                .by_repository
                .get(repository)
                .map(|s| s.contains(client_id))
                .unwrap_or(false)
            && !self
                .by_session
                .get(session_id)
                .map(|s| s.contains(client_id))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str, repo: &str, session: &str, buf: usize) -> Arc<ClientHandle> {
        let (tx, rx) = tokio::sync::mpsc::channel(buf);
        std::mem::forget(rx); // keep the channel open for the test's duration
        ClientHandle::new(id, repo, session, tx)
    }

    #[test]
    fn admitted_client_is_indexed_everywhere() {
        let pool = ConnectionPool::new(10);
        let c = client("c1", "repo", "sess", 4);
        assert_eq!(pool.add(c), Admission::Ok);
        assert!(pool.indexed_everywhere("c1", "repo", "sess"));
    }

    #[test]
    fn removed_client_is_indexed_nowhere() {
        let pool = ConnectionPool::new(10);
        let c = client("c1", "repo", "sess", 4);
        pool.add(c);
        pool.remove("c1");
        assert!(pool.indexed_nowhere("c1", "repo", "sess"));
    }

    #[test]
    fn remove_is_idempotent() {
        let pool = ConnectionPool::new(10);
        pool.remove("does-not-exist");
        pool.remove("does-not-exist");
    }

    #[test]
    fn admission_rejects_past_capacity() {
        let pool = ConnectionPool::new(1);
        assert_eq!(pool.add(client("c1", "r", "s", 4)), Admission::Ok);
        assert_eq!(pool.add(client("c2", "r", "s", 4)), Admission::Full);
    }

    #[test]
    fn broadcast_to_zero_clients_is_a_no_op() {
        let pool = ConnectionPool::new(10);
        let event = MemoryEvent {
            event_type: "memory.created".into(),
            action: None,
            chunk_id: None,
            repository: None,
            session_id: None,
            data: None,
            timestamp: None,
        };
        assert_eq!(pool.broadcast(&event), 0);
    }

    #[test]
    fn slow_consumer_is_evicted_after_second_full_attempt() {
        let pool = ConnectionPool::new(10);
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let client = ClientHandle::new("slow", "repo", "sess", tx);
        pool.add(client);

        let event = MemoryEvent {
            event_type: "ping".into(),
            action: None,
            chunk_id: None,
            repository: None,
            session_id: None,
            data: None,
            timestamp: None,
        };

        // First broadcast fills the single slot.
        assert_eq!(pool.broadcast(&event), 1);
        // Second broadcast finds the queue still full: first full attempt, laggy.
        assert_eq!(pool.broadcast(&event), 0);
        assert!(pool.get("slow").is_some());
        // Third broadcast: second consecutive full attempt, evicted.
        assert_eq!(pool.broadcast(&event), 0);
        assert!(pool.get("slow").is_none());

        drop(rx);
    }

    #[test]
    fn get_by_repository_and_session_scope_correctly() {
        let pool = ConnectionPool::new(10);
        pool.add(client("a", "repo1", "sess1", 4));
        pool.add(client("b", "repo1", "sess2", 4));
        pool.add(client("c", "repo2", "sess1", 4));

        assert_eq!(pool.get_by_repository("repo1").len(), 2);
        assert_eq!(pool.get_by_session("sess1").len(), 2);
        assert_eq!(pool.get_all().len(), 3);
    }
}
