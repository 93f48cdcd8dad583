//! Reconciler error types

use converge_types::{InstanceId, InvalidSpec};
use thiserror::Error;

/// Reconciler errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid spec: {0}")]
    InvalidSpec(#[from] InvalidSpec),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),
}

/// Result type for reconciler operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
