/*
    errors.rs - Error types for the node store
*/

use thiserror::Error;

/// Errors that can occur in the node store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Corrupted data detected during replay
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Empty or otherwise unusable node id / field name
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Lock poisoned by a panicking thread
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::CorruptedData("bad checksum at seq 3".to_string());
        assert_eq!(err.to_string(), "Corrupted data: bad checksum at seq 3");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
