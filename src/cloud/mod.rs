//! Collaborator boundary
//!
//! The lifecycle core talks to two external services through these traits:
//! an object store (landing files, artifacts, backups) and a warehouse
//! (datasets and tables). Every call is a single request/response; the
//! orchestrator wraps each one in a timeout and never retries.

pub mod simulated;

pub use simulated::SimulatedCloud;

use crate::schema::{TableRef, TableSchema};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Acknowledgement of a completed table export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    pub path: String,
    pub row_count: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read at most `max_bytes` from the start of an object.
    async fn read_prefix(&self, path: &str, max_bytes: usize) -> CloudResult<Vec<u8>>;

    /// Write an object; returns once the write is durable.
    async fn write_object(&self, path: &str, content: &[u8]) -> CloudResult<()>;

    /// Export a warehouse table to an object; returns once the export is durable.
    async fn export_table(&self, table: &TableRef, path: &str) -> CloudResult<ExportReceipt>;

    /// Object paths under a prefix, sorted.
    async fn list(&self, prefix: &str) -> CloudResult<Vec<String>>;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn create_dataset(&self, dataset: &str, region: &str) -> CloudResult<()>;

    async fn dataset_exists(&self, dataset: &str) -> CloudResult<bool>;

    async fn list_datasets(&self) -> CloudResult<Vec<String>>;

    async fn create_table(&self, schema: &TableSchema) -> CloudResult<()>;

    async fn drop_table(&self, table: &TableRef) -> CloudResult<()>;

    /// Drop a dataset. Without `cascade` a dataset that still holds tables is rejected.
    async fn drop_dataset(&self, dataset: &str, cascade: bool) -> CloudResult<()>;

    async fn list_tables(&self, dataset: &str) -> CloudResult<Vec<String>>;

    /// Load a CSV object into an existing table; returns rows loaded.
    async fn load_from_object(&self, table: &TableRef, path: &str) -> CloudResult<u64>;

    async fn count_rows(&self, table: &TableRef) -> CloudResult<u64>;

    /// Create a zero-copy snapshot of `source` named `snapshot`.
    async fn snapshot_table(&self, source: &TableRef, snapshot: &TableRef) -> CloudResult<()>;
}
