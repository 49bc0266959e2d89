//! Safe update
//!
//! Replaces a table's schema without losing rows:
//!
//! 1. count rows
//! 2. export the table to `backup/bq_table/...`
//! 3. drop the table
//! 4. recreate it with the new schema
//! 5. reload from the export
//! 6. compare row counts
//!
//! The table is only dropped after the export is confirmed. Once it is gone,
//! every later failure reports the backup path for manual recovery.

use super::create::LayoutChoice;
use super::{warehouse_error, Orchestrator};
use crate::artifacts::{backup_export_path, ArtifactKind, ArtifactReceipt};
use crate::audit::AuditAction;
use crate::error::AppError;
use crate::reaper::Target;
use crate::schema::{validate_identifier, SchemaInference, TableRef, TableSchema};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Where the new column list comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SchemaSource {
    /// Header of a landing file
    File { file_name: String },
    /// Header fields given directly
    Header { columns: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct EvolveRequest {
    pub table: TableRef,
    pub source: SchemaSource,
    pub layout: LayoutChoice,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolveOutcome {
    pub schema: TableSchema,
    pub backup: ArtifactReceipt,
    pub rows_before: u64,
    pub rows_after: u64,
}

impl Orchestrator {
    pub async fn evolve_table(&self, request: EvolveRequest) -> Result<EvolveOutcome, AppError> {
        let target = request.table.to_string();
        if !request.approved {
            info!("🚫 Safe update of {} declined by caller", target);
            return Err(AppError::ApprovalDenied(target));
        }
        validate_identifier("dataset", &request.table.dataset)?;
        validate_identifier("table", &request.table.table)?;
        self.expire_deletions().await;

        let _lease = self
            .leases
            .acquire(Target::Table(request.table.clone()).lease_key())?;

        match self.run_evolve(&request).await {
            Ok(outcome) => {
                self.audit
                    .record(
                        AuditAction::TableEvolved,
                        &target,
                        true,
                        Some(serde_json::json!({
                            "backup": outcome.backup.location,
                            "rowsBefore": outcome.rows_before,
                            "rowsAfter": outcome.rows_after,
                            "columns": outcome.schema.column_names(),
                        })),
                    )
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                error!("❌ Safe update of {} failed: {}", target, e);
                self.audit
                    .record(
                        AuditAction::EvolveFailed,
                        &target,
                        false,
                        Some(serde_json::json!({ "code": e.code(), "error": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_evolve(&self, request: &EvolveRequest) -> Result<EvolveOutcome, AppError> {
        let table = &request.table;
        let target = table.to_string();

        let existing = self.list_tables(&table.dataset).await?;
        if !existing.contains(&table.table) {
            return Err(AppError::NotFound(format!("Table {} not found", target)));
        }

        // Build and validate the new schema before touching anything.
        let header = match &request.source {
            SchemaSource::File { file_name } => self.read_sample(file_name).await?.header,
            SchemaSource::Header { columns } => columns.clone(),
        };
        let inferred = SchemaInference::infer(&table.dataset, &table.table, &header)?;
        let recommendation = self.advisor.recommend(&inferred);
        let schema = self.shape(inferred, &recommendation, &request.layout)?;

        let rows_before = self
            .call(&target, "count_rows", self.quick(), self.warehouse.count_rows(table))
            .await?
            .map_err(|e| warehouse_error("count_rows", e))?;

        // 1. Export. Any failure here leaves the table untouched.
        let backup_path = backup_export_path(table, Utc::now());
        info!("💾 Exporting {} ({} rows) to {}", target, rows_before, backup_path);
        let receipt = self
            .call(
                &target,
                "export",
                self.config.backup_timeout,
                self.store.export_table(table, &backup_path),
            )
            .await?
            .map_err(|e| AppError::BackupFailed {
                target: target.clone(),
                step: "export".to_string(),
                cause: e.to_string(),
            })?;
        if receipt.row_count != rows_before {
            return Err(AppError::BackupFailed {
                target: target.clone(),
                step: "export".to_string(),
                cause: format!(
                    "export holds {} rows but the table has {}",
                    receipt.row_count, rows_before
                ),
            });
        }
        let backup = ArtifactReceipt {
            kind: ArtifactKind::BackupExport,
            location: receipt.path,
            checksum: None,
            row_count: Some(receipt.row_count),
            written_at: Utc::now(),
        };

        // 2. Drop
        self.call(&target, "drop_table", self.quick(), self.warehouse.drop_table(table))
            .await?
            .map_err(|e| AppError::WarehouseDropFailed {
                target: target.clone(),
                cause: e.to_string(),
            })?;
        info!("🗑️  Dropped {} (backup at {})", target, backup.location);

        // 3. Recreate
        self.call(&target, "create_table", self.quick(), self.warehouse.create_table(&schema))
            .await?
            .map_err(|e| AppError::WarehouseCreateFailed {
                target: target.clone(),
                cause: format!("{}; data is preserved at '{}'", e, backup.location),
            })?;

        // 4. Reload
        let loaded = self
            .call(
                &target,
                "reload",
                self.config.backup_timeout,
                self.warehouse.load_from_object(table, &backup.location),
            )
            .await?
            .map_err(|e| AppError::Warehouse {
                step: format!("reload {} from '{}'", target, backup.location),
                cause: e.to_string(),
            })?;

        // 5. Verify
        let rows_after = self
            .call(&target, "count_rows", self.quick(), self.warehouse.count_rows(table))
            .await?
            .map_err(|e| warehouse_error("count_rows", e))?;
        if rows_after != rows_before {
            warn!(
                "Row count mismatch on {}: {} before, {} after ({} loaded)",
                target, rows_before, rows_after, loaded
            );
            return Err(AppError::RowCountMismatch {
                target,
                expected: rows_before,
                actual: rows_after,
                backup_path: backup.location,
            });
        }

        info!("✅ Safe update of {} complete ({} rows)", target, rows_after);
        Ok(EvolveOutcome {
            schema,
            backup,
            rows_before,
            rows_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::cloud::simulated::CloudOp;
    use crate::config::LifecycleConfig;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sales_ref() -> TableRef {
        TableRef::new("sales", "sales_raw")
    }

    fn add_region() -> EvolveRequest {
        EvolveRequest {
            table: sales_ref(),
            source: SchemaSource::Header {
                columns: vec![
                    "Txn Date".to_string(),
                    "Customer ID".to_string(),
                    "Amount".to_string(),
                    "Region".to_string(),
                ],
            },
            layout: LayoutChoice::AcceptRecommendation,
            approved: true,
        }
    }

    #[tokio::test]
    async fn test_safe_update_preserves_rows() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;

        let outcome = orchestrator.evolve_table(add_region()).await.unwrap();
        assert_eq!(outcome.rows_before, 3);
        assert_eq!(outcome.rows_after, 3);
        assert!(outcome
            .backup
            .location
            .starts_with("backup/bq_table/sales_raw/"));

        let schema = cloud.table_schema(&sales_ref()).await.unwrap();
        assert!(schema.column_names().contains(&"region".to_string()));

        let rows = cloud.table_rows(&sales_ref()).await.unwrap();
        assert_eq!(rows[0][0], "2026-01-01");
        assert_eq!(rows[0][3], "");

        // Strict ordering: export, drop, create, load
        let export = cloud.first_call(CloudOp::ExportTable).unwrap();
        let drop = cloud.first_call(CloudOp::DropTable).unwrap();
        let create = cloud.first_call(CloudOp::CreateTable).unwrap();
        let load = cloud.first_call(CloudOp::LoadFromObject).unwrap();
        assert!(export < drop && drop < create && create < load);
    }

    #[tokio::test]
    async fn test_dataset_deletion_in_progress_blocks_update() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;

        let ticket = orchestrator.begin_dataset_deletion("sales").await.unwrap();
        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(err, AppError::TargetBusy(_)));
        assert!(cloud.calls_of(CloudOp::ExportTable).is_empty());

        orchestrator.cancel_deletion(ticket.id).await.unwrap();
        assert!(orchestrator.evolve_table(add_region()).await.is_ok());
    }

    #[tokio::test]
    async fn test_export_failure_never_drops() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;
        cloud.fail(CloudOp::ExportTable, "bucket unreachable");

        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(err, AppError::BackupFailed { ref step, .. } if step == "export"));
        assert!(cloud.calls_of(CloudOp::DropTable).is_empty());
        assert!(cloud.table_exists(&sales_ref()).await);
        assert_eq!(cloud.table_rows(&sales_ref()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_export_timeout_never_drops() {
        let (orchestrator, cloud) = orchestrator_with(LifecycleConfig {
            backup_timeout: Duration::from_millis(20),
            ..LifecycleConfig::default()
        });
        seed_sales_table(&cloud).await;
        cloud.hang(CloudOp::ExportTable);

        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { ref step, .. } if step == "export"));
        assert!(cloud.calls_of(CloudOp::DropTable).is_empty());
        assert!(cloud.table_exists(&sales_ref()).await);
    }

    #[tokio::test]
    async fn test_row_count_mismatch_reports_backup() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;
        cloud.lose_rows_on_load(1);

        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        match err {
            AppError::RowCountMismatch {
                expected,
                actual,
                backup_path,
                ..
            } => {
                assert_eq!((expected, actual), (3, 2));
                assert!(cloud.object(&backup_path).await.is_some());
            }
            other => panic!("expected RowCountMismatch, got {:?}", other),
        }

        let audit = orchestrator.audit().entries(Some("sales.sales_raw"), 1).await;
        assert_eq!(audit[0].action, AuditAction::EvolveFailed);
    }

    #[tokio::test]
    async fn test_recreate_failure_keeps_backup_path_in_error() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;
        cloud.fail(CloudOp::CreateTable, "invalid schema");

        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::WarehouseCreateFailed { ref cause, .. } if cause.contains("backup/bq_table/sales_raw/")
        ));
    }

    #[tokio::test]
    async fn test_update_in_flight_blocks_second_update() {
        let (orchestrator, cloud) = orchestrator();
        seed_sales_table(&cloud).await;

        let _held = orchestrator
            .leases
            .acquire(Target::Table(sales_ref()).lease_key())
            .unwrap();
        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(err, AppError::TargetBusy(_)));
        assert!(cloud.calls_of(CloudOp::ExportTable).is_empty());
    }

    #[tokio::test]
    async fn test_missing_table() {
        let (orchestrator, cloud) = orchestrator();
        cloud.put_dataset("sales").await;
        let err = orchestrator.evolve_table(add_region()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
