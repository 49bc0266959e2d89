//! Audit log of lifecycle outcomes
//!
//! In-memory, append-only. Every create, safe update and deletion records
//! its terminal outcome here, successful or not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// `dataset.table` or dataset id
    pub target: String,
    pub success: bool,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Create
    TableCreated,
    ArtifactsWritten,
    CreateFailed,

    // Safe update
    TableEvolved,
    EvolveFailed,

    // Deletion
    DeletionRequested,
    DeletionExecuted,
    DeletionAborted,
    DeletionFailed,
}

pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn record(
        &self,
        action: AuditAction,
        target: impl Into<String>,
        success: bool,
        details: Option<serde_json::Value>,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            target: target.into(),
            success,
            details,
        };
        self.entries.write().await.push(entry.clone());
        entry
    }

    /// Most recent first, optionally narrowed to one target.
    pub async fn entries(&self, target: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| target.map(|t| e.target == t).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_most_recent_first() {
        let log = AuditLog::new();
        log.record(AuditAction::TableCreated, "sales.a", true, None).await;
        log.record(AuditAction::TableCreated, "sales.b", true, None).await;
        log.record(AuditAction::DeletionExecuted, "sales.a", true, None).await;

        let all = log.entries(None, 10).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, AuditAction::DeletionExecuted);

        let only_a = log.entries(Some("sales.a"), 1).await;
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].action, AuditAction::DeletionExecuted);
    }
}
