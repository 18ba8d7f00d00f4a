/*
    graph - Conflict-free replicated graph store

    The local half of the system:
    - data model (nodes, fields, triples, delta tuples)
    - LWW conflict resolution
    - pluggable node storage (memory, append-only disk log)
    - the engine: put / get / subscribe / apply_remote_delta
*/

pub mod clock;
pub mod engine;
pub mod model;
pub mod resolver;
pub mod store;
pub mod subscribe;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use clock::{LamportClock, LogicalClock, ManualClock};
pub use engine::GraphEngine;
pub use model::{DeltaTuple, FieldName, FieldTriple, NodeId, OriginId, Value};
pub use store::{DiskStore, MemoryStore, NodeStore, StoreError, StoreResult};
pub use subscribe::{ChangeEvent, Pattern, Subscription};
