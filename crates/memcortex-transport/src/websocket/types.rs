//! Client record and event types shared by the WebSocket connection pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Outbound message queued for delivery to a single client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage(pub String);

/// Per-client metadata tracked alongside the three pool indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// When the client was admitted.
    pub connected_at: DateTime<Utc>,
    /// Timestamp of the most recent frame in either direction.
    pub last_activity: DateTime<Utc>,
    /// Caller-supplied key/value pairs (e.g. user-agent, client version).
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl ClientMetadata {
    /// Build metadata stamped with the current time.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            connected_at: now,
            last_activity: now,
            custom: HashMap::new(),
        }
    }
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected WebSocket client. Exclusively owned by the connection
/// pool; handlers only ever see a `Weak`-style lookup (the `ClientId`
/// resolved back through the pool), never a long-lived reference.
#[derive(Debug)]
pub struct ClientHandle {
    /// Stable client identifier.
    pub id: String,
    /// Repository this client is scoped to.
    pub repository: String,
    /// Session this client belongs to.
    pub session_id: String,
    /// Connection bookkeeping.
    pub metadata: parking_lot::RwLock<ClientMetadata>,
    /// Bounded outbound queue, drained by this connection's writer task.
    pub outbound: mpsc::Sender<OutboundMessage>,
    /// Count of consecutive full-queue enqueue attempts. Reset to zero on
    /// any successful enqueue; reaching 2 triggers eviction (the
    /// slow-consumer policy).
    full_attempts: AtomicU32,
}

impl ClientHandle {
    /// Build a new client handle with the given outbound channel.
    pub fn new(
        id: impl Into<String>,
        repository: impl Into<String>,
        session_id: impl Into<String>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            repository: repository.into(),
            session_id: session_id.into(),
            metadata: parking_lot::RwLock::new(ClientMetadata::new()),
            outbound,
            full_attempts: AtomicU32::new(0),
        })
    }

    /// Whether this client has missed at least one delivery and is
    /// considered laggy (but not yet evicted).
    pub fn is_laggy(&self) -> bool {
        self.full_attempts.load(Ordering::Relaxed) > 0
    }

    /// Record a successful enqueue, clearing any lag state.
    pub fn record_delivered(&self) {
        self.full_attempts.store(0, Ordering::Relaxed);
    }

    /// Record a full-queue enqueue attempt. Returns `true` once this is
    /// the *second* consecutive failure, meaning the caller should evict.
    pub fn record_full_attempt(&self) -> bool {
        self.full_attempts.fetch_add(1, Ordering::Relaxed) + 1 >= 2
    }

    /// Touch `last_activity` to now.
    pub fn touch(&self) {
        self.metadata.write().last_activity = Utc::now();
    }
}

/// A memory event broadcast to connected clients, and the payload
/// accepted by the `POST /ws/broadcast` management endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Event type discriminator (required).
    #[serde(rename = "type")]
    pub event_type: String,
    /// The action that produced this event (e.g. "created", "updated").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// The chunk this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// The repository this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// The session this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Arbitrary event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// When the event occurred; defaults to now if absent on ingest.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_full_attempt_signals_eviction() {
        let (tx, _rx) = mpsc::channel(1);
        let client = ClientHandle::new("c1", "repo", "s1", tx);
        assert!(!client.record_full_attempt());
        assert!(client.record_full_attempt());
    }

    #[test]
    fn successful_delivery_resets_lag() {
        let (tx, _rx) = mpsc::channel(1);
        let client = ClientHandle::new("c1", "repo", "s1", tx);
        client.record_full_attempt();
        assert!(client.is_laggy());
        client.record_delivered();
        assert!(!client.is_laggy());
    }
}
