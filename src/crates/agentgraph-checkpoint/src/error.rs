//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested thread/sequence pair
    #[error("Checkpoint not found: thread '{thread_id}' sequence {seq}")]
    NotFound { thread_id: String, seq: u64 },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed request or corrupt stored data
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
