/*
    model.rs - Graph data model

    A graph is a set of nodes addressed by string identifiers. Each node is
    a flat map from field name to the winning (value, timestamp, origin)
    triple. Edges are fields whose value references another node id, or a
    set of node ids.

    Deletion is logical: writing Value::Null through the normal merge path
    acts as a tombstone. Nodes are never physically removed.
*/

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Node identifier
pub type NodeId = String;

/// Field name within a node
pub type FieldName = String;

/// Origin replica identifier, used as the LWW tie-breaker
pub type OriginId = String;

/// A field value. `Link` and `Links` reference other nodes and give the
/// store its graph shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Tombstone / absent value
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Edge to another node
    Link(NodeId),
    /// Set of edges, for one-to-many relations
    Links(BTreeSet<NodeId>),
}

impl Value {
    /// Whether this value is a tombstone
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Node ids referenced by this value
    pub fn links(&self) -> Vec<&NodeId> {
        match self {
            Value::Link(id) => vec![id],
            Value::Links(ids) => ids.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The stored winner for a single field: value plus the merge metadata
/// that decides future conflicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTriple {
    /// Current value
    pub value: Value,

    /// Logical timestamp of the write
    pub timestamp: u64,

    /// Replica that produced the write
    pub origin: OriginId,
}

impl FieldTriple {
    pub fn new(value: Value, timestamp: u64, origin: impl Into<OriginId>) -> Self {
        FieldTriple { value, timestamp, origin: origin.into() }
    }
}

/// All fields of one node
pub type NodeFields = HashMap<FieldName, FieldTriple>;

/// One field update on the wire: a FieldTriple plus its address. Deltas
/// are ordered batches of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaTuple {
    pub node_id: NodeId,
    pub field: FieldName,
    pub value: Value,
    pub timestamp: u64,
    pub origin: OriginId,
}

impl DeltaTuple {
    pub fn new(
        node_id: impl Into<NodeId>,
        field: impl Into<FieldName>,
        triple: FieldTriple,
    ) -> Self {
        DeltaTuple {
            node_id: node_id.into(),
            field: field.into(),
            value: triple.value,
            timestamp: triple.timestamp,
            origin: triple.origin,
        }
    }

    /// The triple carried by this tuple
    pub fn triple(&self) -> FieldTriple {
        FieldTriple {
            value: self.value.clone(),
            timestamp: self.timestamp,
            origin: self.origin.clone(),
        }
    }
}
