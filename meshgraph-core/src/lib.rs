//! meshgraph-core - conflict-free replicated graph synchronization
//!
//! A graph of nodes with last-writer-wins fields, replicated across a
//! mesh of peers over TCP. Writes converge without coordination: every
//! field carries a logical timestamp and an origin id, merges are
//! deterministic on every replica, and peers repair divergence with a
//! state-vector handshake followed by live gossip.

pub mod config;
pub mod graph;
pub mod logging;
pub mod mesh;
pub mod net;
pub mod sync;

pub use config::NodeConfig;
pub use graph::engine::GraphEngine;
pub use graph::model::Value;
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use mesh::{MeshNode, ShutdownHandle};
