/*
    state_vector.rs - Per-field version summary

    A state vector maps node id -> field -> (timestamp, origin), the same
    pair the LWW resolver orders by. Peers exchange these in the handshake
    so each side can send exactly the fields where it is strictly ahead
    under the merge order, instead of replaying the whole graph on every
    reconnect.

    Carrying the origin matters: two replicas that wrote the same field at
    the same timestamp differ only in origin, and a timestamp-only summary
    would leave that divergence unrepaired.
*/

use crate::graph::model::{DeltaTuple, FieldName, NodeId, OriginId};
use crate::graph::store::{NodeStore, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of everything a replica has seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    entries: HashMap<NodeId, HashMap<FieldName, (u64, OriginId)>>,
}

impl StateVector {
    pub fn new() -> Self {
        StateVector { entries: HashMap::new() }
    }

    /// Build the summary of a store's current contents. Tombstones are
    /// included; their versions matter for convergence.
    pub fn from_store(store: &Arc<dyn NodeStore>) -> StoreResult<Self> {
        let mut vector = StateVector::new();
        for node_id in store.node_ids()? {
            for (field, triple) in store.node_fields(&node_id)? {
                vector.record(&node_id, &field, triple.timestamp, &triple.origin);
            }
        }
        Ok(vector)
    }

    /// Record a version, keeping the maximum under (timestamp, origin)
    pub fn record(&mut self, node_id: &str, field: &str, timestamp: u64, origin: &str) {
        let fields = self.entries.entry(node_id.to_string()).or_default();
        match fields.get_mut(field) {
            Some(current) if (timestamp, origin) <= (current.0, current.1.as_str()) => {}
            Some(current) => *current = (timestamp, origin.to_string()),
            None => {
                fields.insert(field.to_string(), (timestamp, origin.to_string()));
            }
        }
    }

    /// Highest version seen for a field, `None` if never seen
    pub fn get(&self, node_id: &str, field: &str) -> Option<(u64, &str)> {
        self.entries
            .get(node_id)
            .and_then(|fields| fields.get(field))
            .map(|(ts, origin)| (*ts, origin.as_str()))
    }

    /// Number of (node, field) pairs tracked
    pub fn len(&self) -> usize {
        self.entries.values().map(|fields| fields.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything in `store` that is strictly ahead of what `remote`
/// advertises, under the resolver's (timestamp, origin) order. This is
/// the anti-entropy half of the sync protocol.
pub fn tuples_newer_than(
    store: &Arc<dyn NodeStore>,
    remote: &StateVector,
) -> StoreResult<Vec<DeltaTuple>> {
    let mut tuples = Vec::new();
    for node_id in store.node_ids()? {
        for (field, triple) in store.node_fields(&node_id)? {
            let ahead = match remote.get(&node_id, &field) {
                None => true,
                Some((ts, origin)) => (triple.timestamp, triple.origin.as_str()) > (ts, origin),
            };
            if ahead {
                tuples.push(DeltaTuple::new(node_id.clone(), field, triple));
            }
        }
    }
    // Deterministic wire order
    tuples.sort_by(|a, b| (&a.node_id, &a.field).cmp(&(&b.node_id, &b.field)));
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{FieldTriple, Value};
    use crate::graph::store::MemoryStore;

    fn store_with(entries: &[(&str, &str, &str, u64, &str)]) -> Arc<dyn NodeStore> {
        let store = MemoryStore::new();
        for (node, field, value, ts, origin) in entries {
            store
                .apply_field_update(
                    node,
                    field,
                    FieldTriple::new(Value::from(*value), *ts, *origin),
                )
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_record_keeps_maximum_version() {
        let mut vector = StateVector::new();
        vector.record("n", "f", 10, "A");
        vector.record("n", "f", 5, "Z");
        assert_eq!(vector.get("n", "f"), Some((10, "A")));

        // Same timestamp, larger origin advances the entry
        vector.record("n", "f", 10, "B");
        assert_eq!(vector.get("n", "f"), Some((10, "B")));
    }

    #[test]
    fn test_from_store_covers_all_fields() {
        let store = store_with(&[
            ("a", "x", "1", 10, "A"),
            ("a", "y", "2", 20, "A"),
            ("b", "x", "3", 30, "A"),
        ]);
        let vector = StateVector::from_store(&store).unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(vector.get("b", "x"), Some((30, "A")));
    }

    #[test]
    fn test_newer_tuples_strictly_ahead_only() {
        let store = store_with(&[("a", "x", "1", 10, "A"), ("a", "y", "2", 20, "A")]);

        let mut remote = StateVector::new();
        remote.record("a", "x", 10, "A"); // identical version: not sent
        remote.record("a", "y", 5, "A"); // behind: sent

        let tuples = tuples_newer_than(&store, &remote).unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].field, "y");
    }

    #[test]
    fn test_equal_timestamp_origin_tie_detected() {
        // Remote wrote the same field at the same timestamp from "A";
        // our "B" write is ahead under the merge order and must be sent.
        let store = store_with(&[("a", "x", "ours", 10, "B")]);

        let mut remote = StateVector::new();
        remote.record("a", "x", 10, "A");

        let tuples = tuples_newer_than(&store, &remote).unwrap();
        assert_eq!(tuples.len(), 1);

        // The mirror case sends nothing
        let store = store_with(&[("a", "x", "theirs", 10, "A")]);
        let mut remote = StateVector::new();
        remote.record("a", "x", 10, "B");
        assert!(tuples_newer_than(&store, &remote).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_fields_are_sent() {
        let store = store_with(&[("a", "x", "1", 10, "A")]);
        let tuples = tuples_newer_than(&store, &StateVector::new()).unwrap();
        assert_eq!(tuples.len(), 1);
    }
}
