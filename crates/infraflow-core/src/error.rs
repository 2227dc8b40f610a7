//! Reconciliation error taxonomy

use infraflow_cloud::{CloudError, FlowError};
use infraflow_gcp::GcpError;
use std::fmt;
use thiserror::Error;

/// Which half of the legacy tool release failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyStage {
    Cleanup,
    RemoveFinalizer,
}

impl fmt::Display for LegacyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyStage::Cleanup => write!(f, "configuration cleanup"),
            LegacyStage::RemoveFinalizer => write!(f, "finalizer removal"),
        }
    }
}

/// Errors from the infrastructure object store
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Infrastructure {0} not found")]
    NotFound(String),

    #[error("Conflict: expected resourceVersion {expected}, found {actual}")]
    Conflict { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }
}

/// Errors of one reconciliation pass
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The persisted state matches no known format. Needs an operator.
    #[error("Unrecognized persisted state: {0}")]
    StateFormat(String),

    #[error("Cloud API error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Flow(FlowError),

    #[error("Status update kept conflicting after {attempts} attempts")]
    PersistConflict { attempts: u32 },

    #[error("Legacy tool {stage} failed: {message}")]
    LegacyBridge { stage: LegacyStage, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FlowError> for ReconcileError {
    /// Persister failures raised inside the executor keep their own kind.
    fn from(error: FlowError) -> Self {
        match error {
            FlowError::Persist(source) => match source.downcast::<ReconcileError>() {
                Ok(inner) => *inner,
                Err(source) => ReconcileError::Flow(FlowError::Persist(source)),
            },
            other => ReconcileError::Flow(other),
        }
    }
}

impl From<GcpError> for ReconcileError {
    fn from(error: GcpError) -> Self {
        match error {
            GcpError::CloudError(e) => ReconcileError::Cloud(e),
            other => ReconcileError::InvalidConfig(other.to_string()),
        }
    }
}

impl ReconcileError {
    /// Whether the outer loop should schedule another pass with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::StateFormat(_)
            | ReconcileError::InvalidConfig(_)
            | ReconcileError::Json(_) => false,
            ReconcileError::Cloud(e) => e.is_transient(),
            ReconcileError::Flow(e) => e.is_retryable(),
            ReconcileError::PersistConflict { .. }
            | ReconcileError::LegacyBridge { .. }
            | ReconcileError::Io(_) => true,
            ReconcileError::Client(e) => !matches!(e, ClientError::Json(_)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
