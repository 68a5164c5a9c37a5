//! Error types for checkpoint operations.
//!
//! Grounded on `langgraph-checkpoint::error::CheckpointError`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("snapshot not found for execution '{0}'")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(i32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
