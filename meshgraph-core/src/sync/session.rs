/*
    session.rs - Per-peer sync session state machine

    One session per live connection: Handshaking from the moment the
    connection is up, Synced once the remote handshake arrives. Synced is
    the steady state where eager gossip flows. A dropped connection
    removes the session entirely; the dialing and retry phases before a
    connection exists belong to the transport owner, not the session.
*/

use crate::graph::model::OriginId;
use tracing::debug;

/// Lifecycle states of a live connection's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Synced,
}

/// State for one peer connection
#[derive(Debug)]
pub struct PeerSession {
    /// Transport connection this session rides on
    pub conn_id: u64,

    /// Remote identity, known after its handshake arrives
    pub peer_id: Option<OriginId>,

    pub state: SessionState,
}

impl PeerSession {
    /// New session for a freshly established connection; our handshake is
    /// on the wire, theirs is awaited
    pub fn handshaking(conn_id: u64) -> Self {
        PeerSession { conn_id, peer_id: None, state: SessionState::Handshaking }
    }

    /// The remote handshake arrived
    pub fn mark_synced(&mut self, peer_id: OriginId) {
        debug!(conn_id = self.conn_id, peer_id = %peer_id, "session synced");
        self.peer_id = Some(peer_id);
        self.state = SessionState::Synced;
    }

    pub fn is_synced(&self) -> bool {
        self.state == SessionState::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = PeerSession::handshaking(7);
        assert_eq!(session.state, SessionState::Handshaking);
        assert!(session.peer_id.is_none());
        assert!(!session.is_synced());

        session.mark_synced("B".to_string());
        assert!(session.is_synced());
        assert_eq!(session.peer_id.as_deref(), Some("B"));
    }
}
