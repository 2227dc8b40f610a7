//! GCP provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GcpError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid infrastructure config: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] infraflow_cloud::CloudError),
}

pub type Result<T> = std::result::Result<T, GcpError>;
