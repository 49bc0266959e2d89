//! Lifecycle Orchestrator
//!
//! Drives the four flows end to end: create, safe update, delete table and
//! delete dataset. Every flow is strictly sequential; each collaborator call
//! has to finish before the next one starts, and each call runs under a
//! timeout. A timed-out call ends the flow and is never retried.
//!
//! - `create`: sample -> infer -> advise -> approve -> execute or write artifacts
//! - `evolve`: export -> drop -> recreate -> reload -> verify row counts
//! - `delete`: safety protocol sessions, backup, authorized drop
//! - `lease`: per-target exclusive leases

pub mod create;
pub mod delete;
pub mod evolve;
pub mod lease;

pub use create::{CreateOutcome, CreateTableRequest, DeployMode, LayoutChoice, TablePlan};
pub use delete::{DeletionOutcome, DeletionTicket};
pub use evolve::{EvolveOutcome, EvolveRequest, SchemaSource};
pub use lease::TargetLeases;

use crate::artifacts::ArtifactGenerator;
use crate::audit::AuditLog;
use crate::cloud::{CloudError, CloudResult, ObjectStore, Warehouse};
use crate::config::LifecycleConfig;
use crate::error::AppError;
use crate::reaper::ReaperSessions;
use crate::sample::SampleReader;
use crate::schema::{validate_identifier, OptimizationAdvisor};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Orchestrator {
    config: Arc<LifecycleConfig>,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    reader: SampleReader,
    generator: ArtifactGenerator,
    advisor: OptimizationAdvisor,
    leases: TargetLeases,
    sessions: ReaperSessions,
    audit: Arc<AuditLog>,
}

/// A dataset and what it holds
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub dataset: String,
    pub exists: bool,
    pub tables: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let reader = SampleReader::new(&config);
        let generator = ArtifactGenerator::new(config.project_id.clone());
        let advisor =
            OptimizationAdvisor::new(config.max_cluster_columns, config.partition_expiration_days);
        let sessions = ReaperSessions::new(config.max_confirmation_attempts, config.deletion_session_ttl);
        Self {
            config: Arc::new(config),
            store,
            warehouse,
            reader,
            generator,
            advisor,
            leases: TargetLeases::new(),
            sessions,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one collaborator call under `limit`.
    ///
    /// The outer error is the timeout; the inner result is the collaborator's
    /// own answer, left for the caller to map onto the step's error variant.
    pub(crate) async fn call<T, F>(
        &self,
        target: &str,
        step: &str,
        limit: Duration,
        fut: F,
    ) -> Result<CloudResult<T>, AppError>
    where
        F: Future<Output = CloudResult<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(%target, %step, after_ms = limit.as_millis() as u64, "collaborator call timed out");
                Err(AppError::Timeout {
                    target: target.to_string(),
                    step: step.to_string(),
                    after_ms: limit.as_millis(),
                })
            }
        }
    }

    fn quick(&self) -> Duration {
        self.config.collaborator_timeout
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// Object paths waiting in the landing folder
    pub async fn list_landing(&self) -> Result<Vec<String>, AppError> {
        let prefix = self.config.landing_prefix.clone();
        self.call(&prefix, "list_landing", self.quick(), self.store.list(&prefix))
            .await?
            .map_err(|e| storage_error("list_landing", e))
    }

    pub async fn list_datasets(&self) -> Result<Vec<String>, AppError> {
        self.call("*", "list_datasets", self.quick(), self.warehouse.list_datasets())
            .await?
            .map_err(|e| warehouse_error("list_datasets", e))
    }

    pub async fn dataset_info(&self, dataset: &str) -> Result<DatasetInfo, AppError> {
        validate_identifier("dataset", dataset)?;
        let exists = self
            .call(dataset, "dataset_exists", self.quick(), self.warehouse.dataset_exists(dataset))
            .await?
            .map_err(|e| warehouse_error("dataset_exists", e))?;
        let tables = if exists {
            self.list_tables(dataset).await?
        } else {
            Vec::new()
        };
        Ok(DatasetInfo {
            dataset: dataset.to_string(),
            exists,
            tables,
        })
    }

    pub async fn list_tables(&self, dataset: &str) -> Result<Vec<String>, AppError> {
        validate_identifier("dataset", dataset)?;
        self.call(dataset, "list_tables", self.quick(), self.warehouse.list_tables(dataset))
            .await?
            .map_err(|e| match e {
                CloudError::NotFound(_) => AppError::NotFound(format!("Dataset {} not found", dataset)),
                other => warehouse_error("list_tables", other),
            })
    }

    /// Make sure `dataset` exists, creating it in the configured region if not.
    async fn ensure_dataset(&self, dataset: &str) -> Result<(), AppError> {
        let exists = self
            .call(dataset, "dataset_exists", self.quick(), self.warehouse.dataset_exists(dataset))
            .await?
            .map_err(|e| warehouse_error("dataset_exists", e))?;
        if exists {
            return Ok(());
        }

        info!("📁 Creating dataset {} in {}", dataset, self.config.region);
        match self
            .call(
                dataset,
                "create_dataset",
                self.quick(),
                self.warehouse.create_dataset(dataset, &self.config.region),
            )
            .await?
        {
            Ok(()) | Err(CloudError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(AppError::WarehouseCreateFailed {
                target: dataset.to_string(),
                cause: e.to_string(),
            }),
        }
    }
}

pub(crate) fn storage_error(step: &str, e: CloudError) -> AppError {
    AppError::Storage {
        step: step.to_string(),
        cause: e.to_string(),
    }
}

pub(crate) fn warehouse_error(step: &str, e: CloudError) -> AppError {
    AppError::Warehouse {
        step: step.to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cloud::SimulatedCloud;
    use crate::schema::{SchemaInference, TableSchema};

    pub fn orchestrator_with(config: LifecycleConfig) -> (Orchestrator, Arc<SimulatedCloud>) {
        let cloud = Arc::new(SimulatedCloud::new());
        let orchestrator = Orchestrator::new(
            config,
            cloud.clone(),
            cloud.clone(),
            Arc::new(AuditLog::new()),
        );
        (orchestrator, cloud)
    }

    pub fn orchestrator() -> (Orchestrator, Arc<SimulatedCloud>) {
        orchestrator_with(LifecycleConfig::default())
    }

    pub fn sales_schema() -> TableSchema {
        SchemaInference::infer("sales", "sales_raw", &["Txn Date", "Customer ID", "Amount"]).unwrap()
    }

    pub fn sales_rows() -> Vec<Vec<String>> {
        [
            ["2026-01-01", "C1", "10"],
            ["2026-01-02", "C2", "20"],
            ["2026-01-03", "C3", "30"],
        ]
        .iter()
        .map(|r| r.iter().map(|v| v.to_string()).collect())
        .collect()
    }

    pub async fn seed_sales_table(cloud: &SimulatedCloud) {
        cloud.put_table(sales_schema(), sales_rows()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::cloud::simulated::CloudOp;

    #[tokio::test]
    async fn test_discovery() {
        let (orchestrator, cloud) = orchestrator();
        cloud.put_object("landing/sales.csv", "a,b\n").await;
        cloud.put_object("backup/x.csv", "a\n").await;
        seed_sales_table(&cloud).await;

        assert_eq!(orchestrator.list_landing().await.unwrap(), vec!["landing/sales.csv"]);
        assert_eq!(orchestrator.list_datasets().await.unwrap(), vec!["sales"]);

        let info = orchestrator.dataset_info("sales").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.tables, vec!["sales_raw"]);

        let missing = orchestrator.dataset_info("nope").await.unwrap();
        assert!(!missing.exists);
        assert!(matches!(
            orchestrator.list_tables("nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_timeout_surfaces_step() {
        let (orchestrator, cloud) = orchestrator_with(LifecycleConfig {
            collaborator_timeout: Duration::from_millis(20),
            ..LifecycleConfig::default()
        });
        cloud.hang(CloudOp::ListDatasets);

        let err = orchestrator.list_datasets().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Timeout { ref step, .. } if step == "list_datasets"
        ));
    }
}
