//! Error types for converged

use converge_reconciler::ReconcileError;
use converge_types::{InstanceId, InvalidSpec};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest could not be read or parsed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Spec failed validation
    #[error("Invalid spec: {0}")]
    InvalidSpec(#[from] InvalidSpec),

    /// Reconciler rejected a call
    #[error("Reconciler error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Errors returned by a container runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Runtime refused the request
    #[error("Runtime refused {action} for {instance_id}: {reason}")]
    Refused {
        instance_id: InstanceId,
        action: &'static str,
        reason: String,
    },

    /// No container for this instance
    #[error("No container for {0}")]
    NotFound(InstanceId),

    /// Call did not complete in time
    #[error("Runtime call for {0} timed out")]
    Timeout(InstanceId),
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
