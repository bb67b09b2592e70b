//! Error types for the storage fabric coordinator.

use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Unified error type spanning crypto, placement, distribution, retrieval,
/// and the device transport.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    // ===== Startup / configuration =====
    #[error("configuration error: {0}")]
    ConfigError(String),

    // ===== Request-level validation =====
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    // ===== Placement =====
    #[error("insufficient capacity: needed {needed} devices, found {found}")]
    InsufficientCapacity { needed: usize, found: usize },

    // ===== Device transport =====
    #[error("device not connected: {0}")]
    NotConnected(String),

    #[error("device request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("device rejected request: {0}")]
    DeviceRejected(String),

    // ===== Cryptography / integrity =====
    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("integrity check failed: {0}")]
    IntegrityError(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    // ===== Lookup =====
    #[error("not found: {0}")]
    NotFound(String),

    // ===== Retrieval =====
    #[error("chunk unavailable: no healthy holder for {0}")]
    Unavailable(String),

    // ===== Underlying infrastructure =====
    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for CoordinatorError {
    fn from(err: bincode::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::InsufficientCapacity {
            needed: 3,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient capacity: needed 3 devices, found 1"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoordinatorError = io_err.into();
        assert!(matches!(err, CoordinatorError::Io(_)));
    }
}
