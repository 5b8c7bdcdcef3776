use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{DiagnosticsSink, StateStore, StatusSink};
use crate::Result;
use crate::domain::{BindingStatus, CreatorStatus, Snapshot};
use crate::logging::DiagnosticRecord;

/// Process-local store, used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: DashMap<String, Snapshot>,
    creator_status: DashMap<String, CreatorStatus>,
    binding_status: DashMap<String, BindingStatus>,
    diagnostics: Mutex<Vec<DiagnosticRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticRecord> {
        self.diagnostics.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_snapshot(&self, creator_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.get(creator_id).map(|s| s.clone()))
    }

    async fn put_snapshot(&self, creator_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .insert(creator_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn delete_snapshot(&self, creator_id: &str) -> Result<()> {
        self.snapshots.remove(creator_id);
        Ok(())
    }
}

#[async_trait]
impl StatusSink for MemoryStore {
    async fn put_creator_status(&self, status: &CreatorStatus) -> Result<()> {
        self.creator_status
            .insert(status.creator_id.clone(), status.clone());
        Ok(())
    }

    async fn get_creator_status(&self, creator_id: &str) -> Result<Option<CreatorStatus>> {
        Ok(self.creator_status.get(creator_id).map(|s| s.clone()))
    }

    async fn delete_creator_status(&self, creator_id: &str) -> Result<()> {
        self.creator_status.remove(creator_id);
        Ok(())
    }

    async fn put_binding_status(&self, status: &BindingStatus) -> Result<()> {
        self.binding_status
            .insert(status.binding_id.clone(), status.clone());
        Ok(())
    }

    async fn get_binding_status(&self, binding_id: &str) -> Result<Option<BindingStatus>> {
        Ok(self.binding_status.get(binding_id).map(|s| s.clone()))
    }

    async fn delete_binding_status(&self, binding_id: &str) -> Result<()> {
        self.binding_status.remove(binding_id);
        Ok(())
    }
}

#[async_trait]
impl DiagnosticsSink for MemoryStore {
    async fn append(&self, record: &DiagnosticRecord) -> Result<()> {
        self.diagnostics.lock().push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DiagnosticRecord>> {
        let records = self.diagnostics.lock();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.diagnostics.lock();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
