//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryDeploymentStore` and `MemoryEndpointLedger` that satisfy
//! the trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{DeploymentId, DeploymentRecord, EndpointRecord, VersionLabel};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryDeploymentStore
// ---------------------------------------------------------------------------

/// In-memory deployment store backed by a `HashMap<id, record>`.
///
/// Insertion order is kept separately so `list` can return newest first
/// even when records share a timestamp.
#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    records: Mutex<HashMap<String, DeploymentRecord>>,
    order: Mutex<Vec<String>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn insert(&self, record: &DeploymentRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        let key = record.deployment_id.0.clone();
        if records.contains_key(&key) {
            return Err(StorageError::DuplicateDeployment { deployment_id: key });
        }
        records.insert(key.clone(), record.clone());
        self.order.lock().unwrap().push(key);
        Ok(())
    }

    async fn update(&self, record: &DeploymentRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        let existing = records
            .get_mut(&record.deployment_id.0)
            .ok_or_else(|| StorageError::DeploymentNotFound {
                deployment_id: record.deployment_id.0.clone(),
            })?;
        check_update(existing, record)?;
        *existing = record.clone();
        Ok(())
    }

    async fn get(&self, deployment_id: &DeploymentId) -> StorageResult<DeploymentRecord> {
        let records = self.records.lock().unwrap();
        records
            .get(&deployment_id.0)
            .cloned()
            .ok_or_else(|| StorageError::DeploymentNotFound {
                deployment_id: deployment_id.0.clone(),
            })
    }

    async fn list(&self, limit: usize) -> StorageResult<Vec<DeploymentRecord>> {
        let records = self.records.lock().unwrap();
        let order = self.order.lock().unwrap();
        Ok(order
            .iter()
            .rev()
            .filter_map(|id| records.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn find_by_version(
        &self,
        version: &VersionLabel,
    ) -> StorageResult<Vec<DeploymentRecord>> {
        let records = self.records.lock().unwrap();
        let order = self.order.lock().unwrap();
        Ok(order
            .iter()
            .filter_map(|id| records.get(id))
            .filter(|r| &r.version == version)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryEndpointLedger
// ---------------------------------------------------------------------------

/// In-memory endpoint ledger backed by a `Vec` (newest last internally).
#[derive(Debug, Default)]
pub struct MemoryEndpointLedger {
    entries: Mutex<Vec<EndpointRecord>>,
}

impl MemoryEndpointLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointLedger for MemoryEndpointLedger {
    async fn record_applied(&self, record: &EndpointRecord) -> StorageResult<()> {
        self.entries.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn last_applied(&self) -> StorageResult<Option<EndpointRecord>> {
        Ok(self.entries.lock().unwrap().last().cloned())
    }

    async fn history(&self, limit: usize) -> StorageResult<Vec<EndpointRecord>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
