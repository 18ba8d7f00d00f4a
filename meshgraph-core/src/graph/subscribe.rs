/*
    subscribe.rs - Change-event fan-out

    Subscriptions are cancellable streams, not bare callbacks: each one owns
    the receiving half of a channel and unregisters itself from the fan-out
    table on Drop, so cleanup is immediate and deterministic.

    Event channels are bounded. A subscriber that stops draining loses
    events, never store state; anti-entropy repairs peers, and a local
    reader can always re-read the node.
*/

use crate::graph::model::{FieldName, NodeId, OriginId, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Capacity of each subscriber's event channel
const EVENT_BUFFER: usize = 256;

/// A single field change, delivered to subscribers and gossiped to peers
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub node_id: NodeId,
    pub field: FieldName,
    pub value: Value,
    pub timestamp: u64,
    pub origin: OriginId,
}

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// A single node id
    Exact(NodeId),
    /// All node ids starting with the prefix (written `prefix*`)
    Prefix(String),
}

impl Pattern {
    /// Parse a pattern string; a trailing `*` makes it a prefix match
    pub fn parse(s: &str) -> Pattern {
        match s.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(s.to_string()),
        }
    }

    pub fn matches(&self, node_id: &str) -> bool {
        match self {
            Pattern::Exact(id) => id == node_id,
            Pattern::Prefix(prefix) => node_id.starts_with(prefix.as_str()),
        }
    }
}

struct Entry {
    pattern: Pattern,
    tx: mpsc::Sender<ChangeEvent>,
    /// Replay snapshot by (node, field), kept to suppress the one live
    /// duplicate a write racing with registration can produce
    replayed: HashMap<(NodeId, FieldName), ChangeEvent>,
}

/// Fan-out table shared between the engine and live subscriptions
#[derive(Clone)]
pub struct SubscriptionRegistry {
    entries: Arc<Mutex<HashMap<u64, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        SubscriptionRegistry {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a subscription with a precomputed replay
    pub fn register(&self, pattern: Pattern, replay: Vec<ChangeEvent>) -> Subscription {
        match self.register_with(pattern, |_| Ok::<_, std::convert::Infallible>(replay)) {
            Ok(subscription) => subscription,
            Err(e) => match e {},
        }
    }

    /// Register a subscription, computing its replay snapshot under the
    /// registry lock. `publish` takes the same lock, so a concurrent write
    /// is either captured by the snapshot or delivered live after
    /// registration; it can never fall between the two.
    pub fn register_with<E>(
        &self,
        pattern: Pattern,
        snapshot: impl FnOnce(&Pattern) -> Result<Vec<ChangeEvent>, E>,
    ) -> Result<Subscription, E> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let replay = snapshot(&pattern)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER.max(replay.len() + 1));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut replayed = HashMap::new();
        for event in replay {
            replayed.insert((event.node_id.clone(), event.field.clone()), event.clone());
            // Channel was sized to hold the full replay
            let _ = tx.try_send(event);
        }
        entries.insert(id, Entry { pattern, tx, replayed });

        Ok(Subscription { id, rx, registry: Arc::downgrade(&self.entries) })
    }

    /// Deliver an event to every matching subscriber
    pub fn publish(&self, event: &ChangeEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| {
            if !entry.pattern.matches(&event.node_id) {
                return true;
            }
            // A write that landed during this entry's snapshot publishes
            // after registration; its event is already in the replay.
            if !entry.replayed.is_empty() {
                let key = (event.node_id.clone(), event.field.clone());
                if let Some(previous) = entry.replayed.remove(&key) {
                    if previous == *event {
                        return true;
                    }
                }
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => true,
                // Full buffer drops the event, not the subscriber
                Err(mpsc::error::TrySendError::Full(_)) => true,
                // Receiver gone; remove the entry
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it removes the fan-out entry immediately.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ChangeEvent>,
    registry: std::sync::Weak<Mutex<HashMap<u64, Entry>>>,
}

impl Subscription {
    /// Wait for the next change event; `None` once the subscription is
    /// closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll for the next event
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(entries) = self.registry.upgrade() {
            let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(node_id: &str, field: &str, value: &str) -> ChangeEvent {
        ChangeEvent {
            node_id: node_id.to_string(),
            field: field.to_string(),
            value: Value::from(value),
            timestamp: 1,
            origin: "A".to_string(),
        }
    }

    #[test]
    fn test_pattern_parse_and_match() {
        assert_eq!(Pattern::parse("patient:1"), Pattern::Exact("patient:1".to_string()));
        assert_eq!(Pattern::parse("patient:*"), Pattern::Prefix("patient:".to_string()));

        assert!(Pattern::parse("patient:*").matches("patient:42"));
        assert!(!Pattern::parse("patient:*").matches("staff:1"));
        assert!(Pattern::parse("patient:1").matches("patient:1"));
        assert!(!Pattern::parse("patient:1").matches("patient:12"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.register(Pattern::parse("patient:*"), Vec::new());

        registry.publish(&event("patient:1", "status", "admitted"));
        registry.publish(&event("staff:1", "name", "rivera"));

        let got = sub.recv().await.unwrap();
        assert_eq!(got.node_id, "patient:1");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_replay_delivered_before_live_events() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry
            .register(Pattern::parse("patient:1"), vec![event("patient:1", "status", "admitted")]);
        registry.publish(&event("patient:1", "ward", "icu"));

        assert_eq!(sub.recv().await.unwrap().field, "status");
        assert_eq!(sub.recv().await.unwrap().field, "ward");
    }

    #[tokio::test]
    async fn test_replayed_event_suppressed_when_published_late() {
        let registry = SubscriptionRegistry::new();
        let seeded = event("a", "f", "v");
        let mut sub = registry.register(Pattern::parse("a"), vec![seeded.clone()]);

        // The write captured by the snapshot publishes after registration;
        // the subscriber must see it exactly once. A genuinely newer write
        // on the same field still flows through.
        registry.publish(&seeded);
        let mut newer = event("a", "f", "v2");
        newer.timestamp = 2;
        registry.publish(&newer);

        assert_eq!(sub.recv().await.unwrap().value, Value::from("v"));
        assert_eq!(sub.recv().await.unwrap().value, Value::from("v2"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unregisters_immediately() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.register(Pattern::parse("a"), Vec::new());
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event_not_subscriber() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.register(Pattern::parse("a"), Vec::new());

        for i in 0..(EVENT_BUFFER + 10) {
            registry.publish(&event("a", &format!("f{}", i), "v"));
        }
        assert_eq!(registry.len(), 1);

        // The first EVENT_BUFFER events are retained in order
        assert_eq!(sub.recv().await.unwrap().field, "f0");
    }
}
