//! Error types for autodeploy-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the state backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("deployment not found: {deployment_id}")]
    DeploymentNotFound { deployment_id: String },

    #[error("deployment already exists: {deployment_id}")]
    DuplicateDeployment { deployment_id: String },

    #[error("deployment {deployment_id} cannot move from {from} to {to}")]
    StateRegression {
        deployment_id: String,
        from: String,
        to: String,
    },

    #[error("deployment {deployment_id} is terminal ({state}) and cannot be modified")]
    TerminalRecord { deployment_id: String, state: String },

    #[error("invalid image digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("invalid version label: {label}")]
    InvalidVersionLabel { label: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
