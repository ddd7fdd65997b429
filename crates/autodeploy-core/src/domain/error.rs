//! Deployment error taxonomy.

use autodeploy_state::{FailureKind, StorageError};

use crate::config::ConfigError;
use crate::domain::event::EventError;

/// Errors surfaced by the orchestrator and deployment client.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no images found in repository {repository}")]
    ArtifactNotFound { repository: String },

    #[error("endpoint update failed: {0}")]
    EndpointUpdateFailed(String),

    #[error("tool schema rejected: {0}")]
    SchemaRejected(String),

    #[error("agent {agent_id} not prepared after {waited_ms}ms")]
    PreparationTimeout { agent_id: String, waited_ms: u64 },

    #[error("provisioning API error during {transition}: {message}")]
    ProvisioningApi { transition: String, message: String },

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(String),
}

impl DeployError {
    /// Failure class recorded on a deployment, if this error is one of the
    /// terminal deployment failures.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            DeployError::ArtifactNotFound { .. } => Some(FailureKind::ArtifactNotFound),
            DeployError::EndpointUpdateFailed(_) => Some(FailureKind::EndpointUpdateFailed),
            DeployError::SchemaRejected(_) => Some(FailureKind::SchemaRejected),
            DeployError::PreparationTimeout { .. } => Some(FailureKind::PreparationTimeout),
            DeployError::ProvisioningApi { .. } => Some(FailureKind::ProvisioningApiError),
            _ => None,
        }
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;
