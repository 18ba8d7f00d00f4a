/*
    Tombstone tests - logical deletion across replicas

    Deletes are null writes through the normal LWW path, so a replica that
    sees the delete late still converges, and a concurrent write with a
    higher timestamp revives the field on every replica.
*/

use crate::graph::clock::ManualClock;
use crate::graph::engine::GraphEngine;
use crate::graph::model::{DeltaTuple, FieldTriple, Value};
use crate::graph::store::MemoryStore;
use std::sync::Arc;

fn engine(origin: &str) -> GraphEngine {
    GraphEngine::new(origin, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0))).unwrap()
}

fn tuple(node: &str, field: &str, value: Value, ts: u64, origin: &str) -> DeltaTuple {
    DeltaTuple::new(node, field, FieldTriple::new(value, ts, origin))
}

#[test]
fn test_delete_propagates_as_null_write() {
    let a = engine("A");
    let b = engine("B");

    let write = tuple("patient:1", "status", Value::from("admitted"), 100, "A");
    let delete = tuple("patient:1", "status", Value::Null, 200, "A");

    a.apply_remote_delta(&[write.clone(), delete.clone()]).unwrap();
    // B sees the delete before the write it deletes
    b.apply_remote_delta(&[delete, write]).unwrap();

    assert!(a.get("patient:1").unwrap().is_empty());
    assert!(b.get("patient:1").unwrap().is_empty());
}

#[test]
fn test_later_write_wins_over_tombstone() {
    let a = engine("A");

    a.apply_remote_delta(&[
        tuple("patient:1", "status", Value::Null, 100, "A"),
        tuple("patient:1", "status", Value::from("readmitted"), 150, "B"),
    ])
    .unwrap();

    assert_eq!(
        a.get_field("patient:1", "status").unwrap(),
        Some(Value::from("readmitted"))
    );
}

#[test]
fn test_node_survives_tombstoning_all_fields() {
    let a = engine("A");
    a.put("patient:1", "status", Value::from("admitted")).unwrap();
    a.delete("patient:1", "status").unwrap();

    // The node is still known to the store, only its visible state is empty
    assert!(a.store().node_ids().unwrap().contains(&"patient:1".to_string()));
    assert!(a.get("patient:1").unwrap().is_empty());
}
