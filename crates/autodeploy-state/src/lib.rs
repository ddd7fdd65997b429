//! autodeploy-state: persistence for agent-autodeploy
//!
//! Stores one `DeploymentRecord` per orchestration run and an append-only
//! ledger of tool-execution endpoint updates. Backed by SurrealDB, with
//! in-memory fakes for tests.
//!
//! ## Key Components
//!
//! - `SurrealHandle`: Manages connection and schema setup
//! - `DeploymentRecord`: Lifecycle state of one deployment (forward-only)
//! - `EndpointRecord`: Audit entry for an applied endpoint image
//! - `DeploymentStore` / `EndpointLedger`: backend-agnostic traits

mod error;
pub mod fakes;
mod handle;
mod migrations;
pub mod records;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{CloudConfig, SurrealHandle, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use records::{
    ArtifactRef, DeploymentId, DeploymentRecord, DeploymentState, EndpointRecord, EndpointRef,
    FailureInfo, FailureKind, ImageDigest, VersionLabel,
};
pub use storage_traits::{DeploymentStore, EndpointLedger, StorageResult};
pub use surreal_store::SurrealDeploymentStore;

/// Result type for autodeploy-state operations
pub type Result<T> = std::result::Result<T, StateError>;
