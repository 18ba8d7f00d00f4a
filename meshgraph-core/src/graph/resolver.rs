/*
    resolver.rs - Last-write-wins conflict resolution

    Pure merge rule for a single field:
    - higher timestamp wins
    - equal timestamps fall back to lexicographic origin comparison,
      larger origin wins
    - equal timestamp and origin fall back to the encoded value bytes, so
      a peer that reuses a (timestamp, origin) pair still cannot leave two
      replicas disagreeing
    - an absent existing triple always loses to the incoming one

    The rule is commutative, associative and idempotent, which is what lets
    replicas apply deltas in any order, any number of times, and converge.
*/

use super::model::{FieldTriple, Value};

/// Whether `incoming` beats `existing` under the LWW rule
pub fn incoming_wins(existing: Option<&FieldTriple>, incoming: &FieldTriple) -> bool {
    match existing {
        None => true,
        Some(current) => {
            if incoming.timestamp != current.timestamp {
                incoming.timestamp > current.timestamp
            } else if incoming.origin != current.origin {
                incoming.origin.as_str() > current.origin.as_str()
            } else {
                value_key(&incoming.value) > value_key(&current.value)
            }
        }
    }
}

/// Byte key for the final tie-break. bincode encoding is stable for a
/// given value, so comparing the bytes yields a total order, floats
/// included.
fn value_key(value: &Value) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_default()
}

/// Merge `incoming` into an optional existing triple, returning the winner
pub fn resolve(existing: Option<FieldTriple>, incoming: FieldTriple) -> FieldTriple {
    match existing {
        Some(current) if !incoming_wins(Some(&current), &incoming) => current,
        _ => incoming,
    }
}
