//! Persistence seams.
//!
//! The engine needs a key-value store for the last snapshot of each creator,
//! a status sink for the administration surface and an append-only sink for
//! diagnostic records. Both an in-memory and a SQLite implementation are
//! provided.

mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::domain::{BindingStatus, CreatorStatus, Snapshot};
use crate::logging::DiagnosticRecord;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Last observed snapshot per creator.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get_snapshot(&self, creator_id: &str) -> Result<Option<Snapshot>>;
    async fn put_snapshot(&self, creator_id: &str, snapshot: &Snapshot) -> Result<()>;
    async fn delete_snapshot(&self, creator_id: &str) -> Result<()>;
}

/// Status written back for the administration surface.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn put_creator_status(&self, status: &CreatorStatus) -> Result<()>;
    async fn get_creator_status(&self, creator_id: &str) -> Result<Option<CreatorStatus>>;
    async fn delete_creator_status(&self, creator_id: &str) -> Result<()>;

    async fn put_binding_status(&self, status: &BindingStatus) -> Result<()>;
    async fn get_binding_status(&self, binding_id: &str) -> Result<Option<BindingStatus>>;
    async fn delete_binding_status(&self, binding_id: &str) -> Result<()>;
}

/// Append-only diagnostic records.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync + 'static {
    async fn append(&self, record: &DiagnosticRecord) -> Result<()>;
    /// Most recent records first.
    async fn recent(&self, limit: usize) -> Result<Vec<DiagnosticRecord>>;
    /// Delete records older than `cutoff`, returning how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
