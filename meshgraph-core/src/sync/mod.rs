/*
    sync - Peer synchronization protocol

    Decides what to send to each peer and how to interpret what arrives:
    state-vector handshakes for anti-entropy catch-up, eager gossip for
    low-latency propagation, and relay of applied changes for multi-hop
    topologies.
*/

pub mod message;
pub mod protocol;
pub mod session;
pub mod state_vector;

#[cfg(test)]
pub mod tests;

pub use message::{CodecError, Delta, SyncMessage, PROTOCOL_VERSION};
pub use protocol::{Outgoing, SyncError, SyncProtocol};
pub use session::{PeerSession, SessionState};
pub use state_vector::{tuples_newer_than, StateVector};
