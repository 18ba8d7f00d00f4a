/*
    store - Node storage backends

    Key-addressed mapping from node id to its field set. The merge rule is
    enforced here: an update lands only if it wins against the stored
    triple, and callers learn whether state actually changed. Backends are
    interchangeable behind the NodeStore trait.
*/

pub mod disk;
pub mod errors;
pub mod memory;

pub use disk::DiskStore;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;

use super::model::{FieldTriple, NodeFields, NodeId};

/// Storage backend for graph nodes.
///
/// Implementations must apply updates through the LWW resolver and must
/// serialize concurrent updates to the same node; updates to different
/// nodes may proceed in parallel.
pub trait NodeStore: Send + Sync {
    /// Merge one field update. Returns true iff the incoming triple won
    /// and store state changed.
    fn apply_field_update(
        &self,
        node_id: &str,
        field: &str,
        incoming: FieldTriple,
    ) -> StoreResult<bool>;

    /// All fields of a node; empty map if the node is unknown
    fn node_fields(&self, node_id: &str) -> StoreResult<NodeFields>;

    /// A single field's stored triple
    fn field(&self, node_id: &str, field: &str) -> StoreResult<Option<FieldTriple>>;

    /// All known node ids
    fn node_ids(&self) -> StoreResult<Vec<NodeId>>;

    /// Highest timestamp stored anywhere, used to seed the logical clock
    /// on startup
    fn max_timestamp(&self) -> StoreResult<u64>;
}
