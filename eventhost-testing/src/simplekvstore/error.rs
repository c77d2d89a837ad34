//! Error types for the simple KV store.

use thiserror::Error;

/// Result type for simple KV store operations.
pub type Result<T> = std::result::Result<T, SimpleKVStoreError>;

/// Errors specific to the simple KV store implementation.
#[derive(Error, Debug, Clone)]
pub enum SimpleKVStoreError {
    #[error("Failed to get keys: {0}")]
    Keys(String),

    #[error("Failed to get entry: {0}")]
    Entry(String),

    #[error("Failed to create key: {0}")]
    Create(String),

    #[error("Failed to update key: {0}")]
    Update(String),

    #[error("Failed to delete key: {0}")]
    Delete(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SimpleKVStoreError::Keys("connection lost".to_string()).to_string(),
            "Failed to get keys: connection lost"
        );
        assert_eq!(
            SimpleKVStoreError::Update("injected failure".to_string()).to_string(),
            "Failed to update key: injected failure"
        );
    }
}
