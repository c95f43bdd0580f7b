use thiserror::Error;

use crate::batch::{BatchId, BatchStatus, ItemId};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SieveletError>;

/// Errors that can occur in the batch engine.
#[derive(Debug, Error)]
pub enum SieveletError {
    /// Bad input at the controller boundary
    #[error("invalid input: {0}")]
    Validation(String),

    /// Caller does not own the batch
    #[error("caller does not own batch {0}")]
    PermissionDenied(BatchId),

    /// Batch not found
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Item not found
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Operation not legal for the batch's current status
    #[error("batch {batch} is {status}; operation not applicable")]
    IllegalTransition {
        batch: BatchId,
        status: BatchStatus,
    },

    /// Refused overwrite of an existing object
    #[error("object already exists at {0}")]
    ObjectExists(String),

    /// Scoring endpoint cannot be reached or is not configured
    #[error("upstream analyzer unavailable: {0}")]
    Upstream(String),

    /// Batch counters no longer reconcile with `total`
    #[error("batch {batch} violated completion accounting: {detail}")]
    InvariantViolation { batch: BatchId, detail: String },

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Internal error
    #[error("internal error: {0}")]
    Other(#[from] anyhow::Error),
}
