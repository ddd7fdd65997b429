//! SurrealDB-backed storage traits
//!
//! `SurrealDeploymentStore` wraps a shared [`SurrealHandle`] and implements
//! `DeploymentStore` and `EndpointLedger` on top of it. Both contracts are
//! exercised against `mem://` in `tests/trait_contracts.rs`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::records::{DeploymentId, DeploymentRecord, EndpointRecord, VersionLabel};
use crate::storage_traits::{DeploymentStore, EndpointLedger, StorageResult};
use crate::SurrealHandle;

/// SurrealDB-backed implementation of `DeploymentStore` and `EndpointLedger`.
#[derive(Clone)]
pub struct SurrealDeploymentStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealDeploymentStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl DeploymentStore for SurrealDeploymentStore {
    async fn insert(&self, record: &DeploymentRecord) -> StorageResult<()> {
        self.handle.deployment_insert(record).await
    }

    async fn update(&self, record: &DeploymentRecord) -> StorageResult<()> {
        self.handle.deployment_update(record).await
    }

    async fn get(&self, deployment_id: &DeploymentId) -> StorageResult<DeploymentRecord> {
        self.handle.deployment_get(deployment_id).await
    }

    async fn list(&self, limit: usize) -> StorageResult<Vec<DeploymentRecord>> {
        self.handle.deployment_list(limit).await
    }

    async fn find_by_version(
        &self,
        version: &VersionLabel,
    ) -> StorageResult<Vec<DeploymentRecord>> {
        self.handle.deployment_find_by_version(version).await
    }
}

#[async_trait]
impl EndpointLedger for SurrealDeploymentStore {
    async fn record_applied(&self, record: &EndpointRecord) -> StorageResult<()> {
        self.handle.endpoint_record(record).await
    }

    async fn last_applied(&self) -> StorageResult<Option<EndpointRecord>> {
        Ok(self.handle.endpoint_history(1).await?.into_iter().next())
    }

    async fn history(&self, limit: usize) -> StorageResult<Vec<EndpointRecord>> {
        self.handle.endpoint_history(limit).await
    }
}
