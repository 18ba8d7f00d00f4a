/*
    engine.rs - Graph engine

    Orchestrates reads and writes against the node store through the LWW
    resolver. Local writes get a fresh logical timestamp, are merged into
    the store, fanned out to subscribers and queued for gossip. Remote
    deltas take the same merge path but keep their original timestamps.
*/

use crate::graph::clock::LogicalClock;
use crate::graph::model::{DeltaTuple, FieldName, FieldTriple, OriginId, Value};
use crate::graph::store::{NodeStore, StoreError, StoreResult};
use crate::graph::subscribe::{ChangeEvent, Pattern, Subscription, SubscriptionRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The graph engine. Cheap to clone via Arc; all methods take `&self`.
pub struct GraphEngine {
    /// Local replica identity, stamped on every local write
    origin: OriginId,

    store: Arc<dyn NodeStore>,
    clock: Arc<dyn LogicalClock>,
    subscriptions: SubscriptionRegistry,

    /// Local changes waiting to be gossiped; taken once by the sync layer
    outbound_tx: mpsc::UnboundedSender<DeltaTuple>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<DeltaTuple>>>,
}

impl GraphEngine {
    pub fn new(
        origin: impl Into<OriginId>,
        store: Arc<dyn NodeStore>,
        clock: Arc<dyn LogicalClock>,
    ) -> StoreResult<Self> {
        // Order local writes after everything already on disk
        clock.observe(store.max_timestamp()?);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Ok(GraphEngine {
            origin: origin.into(),
            store,
            clock,
            subscriptions: SubscriptionRegistry::new(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    /// Local replica identity
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The backing store, for sync-layer reads (state vectors, handshake
    /// delta computation)
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Take the outbound gossip queue. Returns `None` after the first call.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<DeltaTuple>> {
        self.outbound_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Write a field. Returns the assigned logical timestamp.
    pub fn put(&self, node_id: &str, field: &str, value: Value) -> StoreResult<u64> {
        if node_id.is_empty() || field.is_empty() {
            return Err(StoreError::InvalidKey(
                "node id and field must not be empty".to_string(),
            ));
        }

        let timestamp = self.clock.tick();
        let triple = FieldTriple::new(value, timestamp, self.origin.clone());
        let tuple = DeltaTuple::new(node_id, field, triple.clone());

        let changed = self.store.apply_field_update(node_id, field, triple)?;
        debug!(node_id, field, timestamp, changed, "local put");

        if changed {
            self.subscriptions.publish(&change_event(&tuple));
            // Receiver dropped means sync is shut down; the write is still
            // durable locally.
            let _ = self.outbound_tx.send(tuple);
        }

        Ok(timestamp)
    }

    /// Tombstone a field. Peers that have not seen the delete keep
    /// converging because the null write flows through the same LWW path.
    pub fn delete(&self, node_id: &str, field: &str) -> StoreResult<u64> {
        self.put(node_id, field, Value::Null)
    }

    /// Current winning values of a node, tombstones omitted
    pub fn get(&self, node_id: &str) -> StoreResult<HashMap<FieldName, Value>> {
        let fields = self.store.node_fields(node_id)?;
        Ok(fields
            .into_iter()
            .filter(|(_, triple)| !triple.value.is_null())
            .map(|(name, triple)| (name, triple.value))
            .collect())
    }

    /// A single field's winning value, `None` if absent or tombstoned
    pub fn get_field(&self, node_id: &str, field: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .store
            .field(node_id, field)?
            .map(|triple| triple.value)
            .filter(|value| !value.is_null()))
    }

    /// Subscribe to changes on a node id or `prefix*` pattern. The current
    /// matching state is replayed as events before live updates, so a
    /// subscriber never misses the initial state. The snapshot is taken
    /// under the fan-out lock, so a write racing with subscribe lands in
    /// the replay or arrives live, never in between.
    pub fn subscribe(&self, pattern: &str) -> StoreResult<Subscription> {
        let pattern = Pattern::parse(pattern);
        self.subscriptions.register_with(pattern, |pattern| {
            let mut replay = Vec::new();
            for node_id in self.store.node_ids()? {
                if !pattern.matches(&node_id) {
                    continue;
                }
                for (field, triple) in self.store.node_fields(&node_id)? {
                    if triple.value.is_null() {
                        continue;
                    }
                    replay.push(ChangeEvent {
                        node_id: node_id.clone(),
                        field,
                        value: triple.value,
                        timestamp: triple.timestamp,
                        origin: triple.origin,
                    });
                }
            }
            // Deterministic replay order
            replay.sort_by(|a, b| (&a.node_id, &a.field).cmp(&(&b.node_id, &b.field)));
            Ok(replay)
        })
    }

    /// Apply a batch of remote tuples. Malformed tuples are dropped one by
    /// one; the rest of the batch still applies. Returns the tuples that
    /// changed store state, which is exactly what should be relayed to
    /// other peers.
    pub fn apply_remote_delta(&self, tuples: &[DeltaTuple]) -> StoreResult<Vec<DeltaTuple>> {
        let mut applied = Vec::new();

        for tuple in tuples {
            if tuple.node_id.is_empty() || tuple.field.is_empty() || tuple.origin.is_empty() {
                warn!(
                    node_id = %tuple.node_id,
                    field = %tuple.field,
                    origin = %tuple.origin,
                    "dropping malformed delta tuple"
                );
                continue;
            }

            self.clock.observe(tuple.timestamp);
            let changed =
                self.store.apply_field_update(&tuple.node_id, &tuple.field, tuple.triple())?;
            if changed {
                self.subscriptions.publish(&change_event(tuple));
                applied.push(tuple.clone());
            }
        }

        debug!(received = tuples.len(), applied = applied.len(), "applied remote delta");
        Ok(applied)
    }
}

fn change_event(tuple: &DeltaTuple) -> ChangeEvent {
    ChangeEvent {
        node_id: tuple.node_id.clone(),
        field: tuple.field.clone(),
        value: tuple.value.clone(),
        timestamp: tuple.timestamp,
        origin: tuple.origin.clone(),
    }
}
