//! Storage trait definitions for agent-autodeploy
//!
//! These traits define the two durable pieces of state:
//! - `DeploymentStore`: one record per orchestration run
//! - `EndpointLedger`: append-only history of applied endpoint references
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{DeploymentId, DeploymentRecord, EndpointRecord, VersionLabel};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Deployment record persistence.
///
/// Guarantees:
/// - `insert` fails if the id already exists.
/// - `update` rejects unknown ids, state regressions, and any write to a
///   terminal record (`Ready` / `Failed`).
/// - `list` returns newest records first.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist a new record.
    async fn insert(&self, record: &DeploymentRecord) -> StorageResult<()>;

    /// Replace an existing record, enforcing forward-only state.
    async fn update(&self, record: &DeploymentRecord) -> StorageResult<()>;

    /// Fetch a record by id.
    async fn get(&self, deployment_id: &DeploymentId) -> StorageResult<DeploymentRecord>;

    /// List up to `limit` records, newest first.
    async fn list(&self, limit: usize) -> StorageResult<Vec<DeploymentRecord>>;

    /// All records sharing a version label, oldest first.
    async fn find_by_version(&self, version: &VersionLabel)
        -> StorageResult<Vec<DeploymentRecord>>;
}

/// Append-only ledger of tool-execution endpoint updates.
///
/// The newest entry is the last-applied endpoint reference. Entries are
/// never removed; rollback is an explicit operator action outside this
/// system.
#[async_trait]
pub trait EndpointLedger: Send + Sync {
    /// Record an applied endpoint reference.
    async fn record_applied(&self, record: &EndpointRecord) -> StorageResult<()>;

    /// The most recently applied reference, if any.
    async fn last_applied(&self) -> StorageResult<Option<EndpointRecord>>;

    /// Up to `limit` entries, newest first.
    async fn history(&self, limit: usize) -> StorageResult<Vec<EndpointRecord>>;
}

/// Check an update against the stored record.
///
/// Shared by every backend so the forward-only rule is identical.
pub fn check_update(existing: &DeploymentRecord, next: &DeploymentRecord) -> StorageResult<()> {
    if existing.state.is_terminal() {
        return Err(StorageError::TerminalRecord {
            deployment_id: existing.deployment_id.0.clone(),
            state: existing.state.to_string(),
        });
    }
    if !existing.state.permits(next.state) {
        return Err(StorageError::StateRegression {
            deployment_id: existing.deployment_id.0.clone(),
            from: existing.state.to_string(),
            to: next.state.to_string(),
        });
    }
    Ok(())
}
