/*
    protocol.rs - Sync protocol logic

    Transport-agnostic: every entry point consumes one input (connection
    event, wire message, local change) and returns the messages to send,
    as (conn_id, SyncMessage) pairs. The mesh node shuttles those to the
    transport; tests shuttle them in process.

    Traffic shape:
    - on connect both sides send a Handshake and answer it with exactly
      the strictly-newer fields (anti-entropy)
    - local changes are gossiped immediately to every synced peer
    - remote tuples that changed state are relayed to every synced peer
      except the one they arrived from; unchanged tuples are not relayed,
      which bounds multi-hop gossip
*/

use crate::graph::engine::GraphEngine;
use crate::graph::model::DeltaTuple;
use crate::graph::store::StoreError;
use crate::sync::message::{CodecError, Delta, SyncMessage};
use crate::sync::session::{PeerSession, SessionState};
use crate::sync::state_vector::{tuples_newer_than, StateVector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the sync protocol
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A message addressed to one connection
pub type Outgoing = (u64, SyncMessage);

/// The sync protocol state: one session per live connection
pub struct SyncProtocol {
    engine: Arc<GraphEngine>,
    sessions: Mutex<HashMap<u64, PeerSession>>,
}

impl SyncProtocol {
    pub fn new(engine: Arc<GraphEngine>) -> Self {
        SyncProtocol { engine, sessions: Mutex::new(HashMap::new()) }
    }

    /// A connection is up; open a session and send our handshake
    pub fn on_connected(&self, conn_id: u64) -> Result<Vec<Outgoing>, SyncError> {
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            // An inbound frame can beat the connect event; keep a session
            // the handshake already opened instead of clobbering it
            sessions.entry(conn_id).or_insert_with(|| PeerSession::handshaking(conn_id));
        }

        let handshake = SyncMessage::Handshake {
            peer_id: self.engine.origin().to_string(),
            state_vector: StateVector::from_store(self.engine.store())?,
        };
        Ok(vec![(conn_id, handshake)])
    }

    /// A connection dropped; forget its session. Reconnect scheduling is
    /// the caller's concern.
    pub fn on_disconnected(&self, conn_id: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.remove(&conn_id) {
            info!(conn_id, peer_id = ?session.peer_id, "peer session closed");
        }
    }

    /// Process one wire message from a connection
    pub fn on_message(
        &self,
        conn_id: u64,
        message: SyncMessage,
    ) -> Result<Vec<Outgoing>, SyncError> {
        match message {
            SyncMessage::Handshake { peer_id, state_vector } => {
                self.on_handshake(conn_id, peer_id, state_vector)
            }
            SyncMessage::DeltaBatch(delta) => self.on_delta(conn_id, delta),
            SyncMessage::Ack { applied } => {
                debug!(conn_id, applied, "delta batch acknowledged");
                Ok(Vec::new())
            }
        }
    }

    /// Gossip a local change to every synced peer
    pub fn on_local_change(&self, tuple: DeltaTuple) -> Vec<Outgoing> {
        self.broadcast(Delta::new(vec![tuple]), None)
    }

    /// Number of sessions currently in the Synced state
    pub fn synced_peer_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.values().filter(|s| s.is_synced()).count()
    }

    fn on_handshake(
        &self,
        conn_id: u64,
        peer_id: String,
        state_vector: StateVector,
    ) -> Result<Vec<Outgoing>, SyncError> {
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            // An inbound connection may deliver its handshake before we
            // processed the connect event; open the session on demand.
            let session =
                sessions.entry(conn_id).or_insert_with(|| PeerSession::handshaking(conn_id));
            if session.state == SessionState::Handshaking {
                session.mark_synced(peer_id.clone());
            }
        }
        info!(conn_id, peer_id = %peer_id, "handshake received");

        // Anti-entropy: answer with exactly what the peer is missing
        let missing = tuples_newer_than(self.engine.store(), &state_vector)?;
        if missing.is_empty() {
            Ok(Vec::new())
        } else {
            debug!(conn_id, tuples = missing.len(), "sending anti-entropy delta");
            Ok(vec![(conn_id, SyncMessage::DeltaBatch(Delta::new(missing)))])
        }
    }

    fn on_delta(&self, conn_id: u64, delta: Delta) -> Result<Vec<Outgoing>, SyncError> {
        let applied = self.engine.apply_remote_delta(&delta.tuples)?;

        let mut outgoing = vec![(conn_id, SyncMessage::Ack { applied: applied.len() as u32 })];
        if !applied.is_empty() {
            // Relay what actually changed, but never back to the sender
            outgoing.extend(self.broadcast(Delta::new(applied), Some(conn_id)));
        }
        Ok(outgoing)
    }

    fn broadcast(&self, delta: Delta, exclude_conn: Option<u64>) -> Vec<Outgoing> {
        if delta.is_empty() {
            return Vec::new();
        }
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let targets: Vec<u64> = sessions
            .values()
            .filter(|session| session.is_synced() && Some(session.conn_id) != exclude_conn)
            .map(|session| session.conn_id)
            .collect();

        if targets.is_empty() {
            return Vec::new();
        }
        debug!(peers = targets.len(), tuples = delta.tuples.len(), "gossiping delta");
        targets
            .into_iter()
            .map(|conn_id| (conn_id, SyncMessage::DeltaBatch(delta.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::clock::ManualClock;
    use crate::graph::model::{FieldTriple, Value};
    use crate::graph::store::MemoryStore;

    fn protocol(origin: &str) -> SyncProtocol {
        let engine = GraphEngine::new(
            origin,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        SyncProtocol::new(Arc::new(engine))
    }

    fn tuple(node: &str, field: &str, value: &str, ts: u64, origin: &str) -> DeltaTuple {
        DeltaTuple::new(node, field, FieldTriple::new(Value::from(value), ts, origin))
    }

    #[test]
    fn test_connect_sends_handshake() {
        let protocol = protocol("A");
        let outgoing = protocol.on_connected(1).unwrap();

        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].0, 1);
        assert!(matches!(outgoing[0].1, SyncMessage::Handshake { .. }));
    }

    #[test]
    fn test_handshake_answered_with_missing_fields_only() {
        let protocol = protocol("A");
        protocol
            .engine
            .apply_remote_delta(&[
                tuple("a", "x", "1", 10, "A"),
                tuple("a", "y", "2", 20, "A"),
            ])
            .unwrap();
        protocol.on_connected(1).unwrap();

        // Peer already knows "a.x" at 10
        let mut vector = StateVector::new();
        vector.record("a", "x", 10, "A");

        let outgoing = protocol
            .on_message(1, SyncMessage::Handshake { peer_id: "B".to_string(), state_vector: vector })
            .unwrap();

        assert_eq!(outgoing.len(), 1);
        match &outgoing[0].1 {
            SyncMessage::DeltaBatch(delta) => {
                assert_eq!(delta.tuples.len(), 1);
                assert_eq!(delta.tuples[0].field, "y");
            }
            other => panic!("expected delta batch, got {:?}", other),
        }
    }

    #[test]
    fn test_handshake_with_nothing_missing_sends_nothing() {
        let protocol = protocol("A");
        protocol.on_connected(1).unwrap();

        let outgoing = protocol
            .on_message(
                1,
                SyncMessage::Handshake {
                    peer_id: "B".to_string(),
                    state_vector: StateVector::new(),
                },
            )
            .unwrap();
        assert!(outgoing.is_empty());
        assert_eq!(protocol.synced_peer_count(), 1);
    }

    #[test]
    fn test_delta_acked_and_relayed_to_other_peers() {
        let protocol = protocol("A");

        // Two synced peers
        for conn in [1, 2] {
            protocol.on_connected(conn).unwrap();
            protocol
                .on_message(
                    conn,
                    SyncMessage::Handshake {
                        peer_id: format!("peer-{}", conn),
                        state_vector: StateVector::new(),
                    },
                )
                .unwrap();
        }

        let delta = Delta::new(vec![tuple("n", "f", "v", 10, "B")]);
        let outgoing = protocol.on_message(1, SyncMessage::DeltaBatch(delta)).unwrap();

        // Ack to the sender, relay to the other peer, nothing back to 1
        assert!(outgoing
            .iter()
            .any(|(conn, msg)| *conn == 1 && matches!(msg, SyncMessage::Ack { applied: 1 })));
        assert!(outgoing
            .iter()
            .any(|(conn, msg)| *conn == 2 && matches!(msg, SyncMessage::DeltaBatch(_))));
        assert!(!outgoing
            .iter()
            .any(|(conn, msg)| *conn == 1 && matches!(msg, SyncMessage::DeltaBatch(_))));
    }

    #[test]
    fn test_stale_delta_not_relayed() {
        let protocol = protocol("A");
        for conn in [1, 2] {
            protocol.on_connected(conn).unwrap();
            protocol
                .on_message(
                    conn,
                    SyncMessage::Handshake {
                        peer_id: format!("peer-{}", conn),
                        state_vector: StateVector::new(),
                    },
                )
                .unwrap();
        }

        let delta = Delta::new(vec![tuple("n", "f", "v", 10, "B")]);
        protocol.on_message(1, SyncMessage::DeltaBatch(delta.clone())).unwrap();

        // Same delta again: applied count is zero and no relay happens
        let outgoing = protocol.on_message(1, SyncMessage::DeltaBatch(delta)).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert!(matches!(outgoing[0].1, SyncMessage::Ack { applied: 0 }));
    }

    #[test]
    fn test_local_change_gossiped_to_all_synced_peers() {
        let protocol = protocol("A");
        for conn in [1, 2, 3] {
            protocol.on_connected(conn).unwrap();
        }
        // Only 1 and 2 complete the handshake
        for conn in [1, 2] {
            protocol
                .on_message(
                    conn,
                    SyncMessage::Handshake {
                        peer_id: format!("peer-{}", conn),
                        state_vector: StateVector::new(),
                    },
                )
                .unwrap();
        }

        let outgoing = protocol.on_local_change(tuple("n", "f", "v", 10, "A"));
        let conns: Vec<u64> = outgoing.iter().map(|(conn, _)| *conn).collect();
        assert_eq!(conns.len(), 2);
        assert!(conns.contains(&1) && conns.contains(&2));
    }

    #[test]
    fn test_connect_event_after_early_handshake_keeps_session() {
        let protocol = protocol("A");

        // The remote handshake arrives before we process the connect event
        protocol
            .on_message(
                1,
                SyncMessage::Handshake {
                    peer_id: "B".to_string(),
                    state_vector: StateVector::new(),
                },
            )
            .unwrap();
        assert_eq!(protocol.synced_peer_count(), 1);

        // The late connect event still sends our handshake but must not
        // reset the session
        let outgoing = protocol.on_connected(1).unwrap();
        assert!(matches!(outgoing[0].1, SyncMessage::Handshake { .. }));
        assert_eq!(protocol.synced_peer_count(), 1);
    }

    #[test]
    fn test_disconnect_removes_session() {
        let protocol = protocol("A");
        protocol.on_connected(1).unwrap();
        protocol
            .on_message(
                1,
                SyncMessage::Handshake {
                    peer_id: "B".to_string(),
                    state_vector: StateVector::new(),
                },
            )
            .unwrap();
        assert_eq!(protocol.synced_peer_count(), 1);

        protocol.on_disconnected(1);
        assert_eq!(protocol.synced_peer_count(), 0);
        assert!(protocol.on_local_change(tuple("n", "f", "v", 10, "A")).is_empty());
    }
}
