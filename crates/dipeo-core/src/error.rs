//! Error taxonomy for the execution engine (spec §4.11, §7).
//!
//! One variant per failure category the execution engine distinguishes. Lower-layer
//! errors (checkpoint I/O, JSON) are wrapped with `#[from]` rather than
//! re-encoded as strings, so callers can match on `source()` when they need
//! the underlying cause.

use std::time::Duration;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Abstract failure kinds. Matches spec §4.11's taxonomy name-for-name.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Diagram rejected before any execution starts.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required service was missing or misconfigured at node activation.
    #[error("configuration error for node '{node}': {message}")]
    Configuration { node: String, message: String },

    /// Input resolution failed for a specific node.
    #[error("input resolution error for node '{node}': {message}")]
    InputResolution { node: String, message: String },

    /// A handler returned an application-level error.
    #[error("handler error for node '{node}': {message}")]
    Handler { node: String, message: String },

    /// A transient failure from an external service (LLM, filesystem, API).
    /// Retryable per the policy in [`crate::retry::RetryPolicy`].
    #[error("external service error for node '{node}': {message}")]
    ExternalService { node: String, message: String },

    /// An operation exceeded its allotted time.
    #[error("timeout after {0:?}: {1}")]
    Timeout(Duration, String),

    /// The run (or an in-flight node) was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// Checkpoint persistence failure.
    #[error(transparent)]
    Checkpoint(#[from] dipeo_checkpoint::CheckpointError),

    /// JSON (de)serialization failure outside the checkpoint layer.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Anything that doesn't fit the above and isn't expected to be matched on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error kind is retried by the scheduler per spec §4.11.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ExternalService { .. } | EngineError::Timeout(..))
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::Configuration { node, .. }
            | EngineError::InputResolution { node, .. }
            | EngineError::Handler { node, .. }
            | EngineError::ExternalService { node, .. } => Some(node),
            _ => None,
        }
    }
}
