/*
    memory.rs - In-memory node store

    Sharded map so that writes to unrelated nodes do not serialize against
    each other. A node's fields live in exactly one shard, so the
    compare-and-swap of a field triple happens under that shard's write
    lock and the merge invariant holds under concurrency.
*/

use crate::graph::model::{FieldTriple, NodeFields, NodeId};
use crate::graph::resolver;
use crate::graph::store::errors::{StoreError, StoreResult};
use crate::graph::store::NodeStore;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

const SHARD_COUNT: usize = 16;

/// Convert poison errors into StoreError
fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Volatile in-memory store
pub struct MemoryStore {
    shards: Vec<RwLock<HashMap<NodeId, NodeFields>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        MemoryStore { shards }
    }

    fn shard_for(&self, node_id: &str) -> &RwLock<HashMap<NodeId, NodeFields>> {
        let mut hasher = DefaultHasher::new();
        node_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryStore {
    fn apply_field_update(
        &self,
        node_id: &str,
        field: &str,
        incoming: FieldTriple,
    ) -> StoreResult<bool> {
        let mut shard = self.shard_for(node_id).write().map_err(handle_poison)?;
        let fields = shard.entry(node_id.to_string()).or_default();

        if resolver::incoming_wins(fields.get(field), &incoming) {
            fields.insert(field.to_string(), incoming);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn node_fields(&self, node_id: &str) -> StoreResult<NodeFields> {
        let shard = self.shard_for(node_id).read().map_err(handle_poison)?;
        Ok(shard.get(node_id).cloned().unwrap_or_default())
    }

    fn field(&self, node_id: &str, field: &str) -> StoreResult<Option<FieldTriple>> {
        let shard = self.shard_for(node_id).read().map_err(handle_poison)?;
        Ok(shard.get(node_id).and_then(|fields| fields.get(field)).cloned())
    }

    fn node_ids(&self) -> StoreResult<Vec<NodeId>> {
        let mut ids = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().map_err(handle_poison)?;
            ids.extend(shard.keys().cloned());
        }
        Ok(ids)
    }

    fn max_timestamp(&self) -> StoreResult<u64> {
        let mut max = 0;
        for shard in &self.shards {
            let shard = shard.read().map_err(handle_poison)?;
            for fields in shard.values() {
                for triple in fields.values() {
                    max = max.max(triple.timestamp);
                }
            }
        }
        Ok(max)
    }
}
