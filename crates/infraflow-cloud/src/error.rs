//! Cloud and flow engine error types

use crate::state::{ResourceKey, ResourceStatus};
use thiserror::Error;

/// Errors returned by cloud collaborators.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid resource spec: {0}")]
    InvalidSpec(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Conflicting operation in progress: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether retrying the same call later can succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::RateLimited(_)
            | CloudError::Unavailable(_)
            | CloudError::Conflict(_)
            | CloudError::Timeout(_) => true,
            CloudError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors decoding or validating a persisted flow state document.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Flow state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not a flow state document (apiVersion '{api_version}')")]
    WrongType { api_version: String },

    #[error("Flow state schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("Invalid flow state: {0}")]
    Invalid(String),
}

/// Boxed error returned by state persisters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the task graph and executor.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Duplicate resource key in task graph: {0}")]
    DuplicateKey(ResourceKey),

    #[error("Resource {key} depends on unknown resource {dependency}")]
    UnknownDependency {
        key: ResourceKey,
        dependency: ResourceKey,
    },

    #[error("Dependency cycle detected at {0}")]
    Cycle(ResourceKey),

    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: ResourceKey,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    #[error("Invalid resource key '{0}'")]
    InvalidKey(String),

    #[error("Step {key} failed: {source}")]
    Step {
        key: ResourceKey,
        #[source]
        source: CloudError,
    },

    #[error("Failed to persist flow state: {0}")]
    Persist(#[source] BoxError),

    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl FlowError {
    /// Step failures caused by transient cloud errors and cancellations are worth
    /// another pass; graph errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Step { source, .. } => source.is_transient(),
            FlowError::Persist(_) | FlowError::Cancelled => true,
            _ => false,
        }
    }
}
