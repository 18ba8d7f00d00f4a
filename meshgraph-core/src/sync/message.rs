/*
    message.rs - Sync protocol wire messages

    Three message kinds flow between peers:
    - Handshake: identity + state vector, sent by both sides on connect
    - DeltaBatch: ordered field updates
    - Ack: count of tuples a delta batch actually changed

    Messages are bincode-encoded behind a format version byte checked on
    decode.
*/

use crate::graph::model::DeltaTuple;
use crate::sync::state_vector::StateVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the sync wire format
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors from encoding or decoding sync messages
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Unsupported protocol version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u8, actual: u8 },
}

/// An ordered batch of field updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub tuples: Vec<DeltaTuple>,
}

impl Delta {
    pub fn new(tuples: Vec<DeltaTuple>) -> Self {
        Delta { tuples }
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

/// Wire messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Identity plus a summary of everything the sender has seen
    Handshake { peer_id: String, state_vector: StateVector },

    /// Field updates, either anti-entropy catch-up or eager gossip
    DeltaBatch(Delta),

    /// Receipt for a delta batch: how many tuples changed state
    Ack { applied: u32 },
}

impl SyncMessage {
    /// Encode as `[version][bincode body]`
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))?;
        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(PROTOCOL_VERSION);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a framed message, rejecting unknown versions
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (&version, body) = bytes
            .split_first()
            .ok_or_else(|| CodecError::Decode("empty frame".to_string()))?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }
        bincode::deserialize(body).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
