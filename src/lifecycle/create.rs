//! Create flow
//!
//! `plan_table` reads a sample, infers the raw-layer schema and asks the
//! advisor for a layout. Nothing is written. `create_table` re-runs the plan,
//! applies the approved layout and then either creates the table in the
//! warehouse or writes the DDL and JSON artifacts for an IaC pipeline. The
//! same `TableSchema` value feeds both paths.

use super::{storage_error, Orchestrator};
use crate::artifacts::ArtifactReceipt;
use crate::audit::AuditAction;
use crate::cloud::CloudError;
use crate::error::AppError;
use crate::reaper::Target;
use crate::sample::Sample;
use crate::schema::{
    validate_identifier, LayoutPlan, Recommendation, SchemaInference, TableSchema,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Everything presented to the caller for approval
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePlan {
    pub sample: Sample,
    pub schema: TableSchema,
    pub recommendation: Recommendation,
    /// DDL as it would be executed with the recommendation accepted
    pub ddl_preview: String,
}

/// Which layout to apply on top of the inferred schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "choice", rename_all = "camelCase")]
pub enum LayoutChoice {
    #[default]
    AcceptRecommendation,
    Override { layout: LayoutPlan },
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeployMode {
    /// Create the table directly in the warehouse
    #[default]
    Execute,
    /// Write DDL + JSON artifacts for an external pipeline
    Artifacts,
}

#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    pub file_name: String,
    pub dataset: String,
    pub table: String,
    pub approved: bool,
    pub layout: LayoutChoice,
    pub mode: DeployMode,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub mode: DeployMode,
    pub schema: TableSchema,
    pub ddl: String,
    pub artifacts: Vec<ArtifactReceipt>,
}

impl Orchestrator {
    /// Sample -> infer -> recommend. Read-only.
    pub async fn plan_table(&self, file_name: &str, dataset: &str, table: &str) -> Result<TablePlan, AppError> {
        validate_identifier("dataset", dataset)?;
        validate_identifier("table", table)?;

        let sample = self.read_sample(file_name).await?;
        let schema = SchemaInference::infer(dataset, table, &sample.header)?;
        let recommendation = self.advisor.recommend(&schema);

        let mut preview = schema.clone();
        preview.apply_layout(&recommendation.to_layout(), self.config.max_cluster_columns)?;
        let ddl_preview = self.generator.render_ddl(&preview);

        info!(
            "📋 Planned {}.{} from {} ({} columns)",
            dataset,
            table,
            sample.path,
            schema.columns.len()
        );

        Ok(TablePlan {
            sample,
            schema,
            recommendation,
            ddl_preview,
        })
    }

    pub(crate) async fn read_sample(&self, file_name: &str) -> Result<Sample, AppError> {
        let path = self.reader.resolve(file_name)?;
        let bytes = self
            .call(
                &path,
                "read_source",
                self.quick(),
                self.store.read_prefix(&path, self.reader.max_bytes()),
            )
            .await?
            .map_err(|e| AppError::SourceUnavailable {
                path: path.clone(),
                cause: e.to_string(),
            })?;
        self.reader.parse(&path, &bytes)
    }

    /// Inferred schema with the chosen layout applied
    pub(crate) fn shape(
        &self,
        mut schema: TableSchema,
        recommendation: &Recommendation,
        choice: &LayoutChoice,
    ) -> Result<TableSchema, AppError> {
        let layout = match choice {
            LayoutChoice::AcceptRecommendation => recommendation.to_layout(),
            LayoutChoice::Override { layout } => layout.clone(),
            LayoutChoice::Plain => LayoutPlan::default(),
        };
        schema.apply_layout(&layout, self.config.max_cluster_columns)?;
        Ok(schema)
    }

    pub async fn create_table(&self, request: CreateTableRequest) -> Result<CreateOutcome, AppError> {
        let target = format!("{}.{}", request.dataset, request.table);
        if !request.approved {
            info!("🚫 Creation of {} declined by caller", target);
            return Err(AppError::ApprovalDenied(target));
        }

        let plan = self
            .plan_table(&request.file_name, &request.dataset, &request.table)
            .await?;
        let schema = self.shape(plan.schema, &plan.recommendation, &request.layout)?;
        let ddl = self.generator.render_ddl(&schema);
        ensure_ddl_names_target(&ddl, &self.generator.qualified_name(&schema))?;

        let result = match request.mode {
            DeployMode::Execute => self.execute_create(&schema).await.map(|_| Vec::new()),
            DeployMode::Artifacts => self.write_table_artifacts(&schema).await,
        };

        match result {
            Ok(artifacts) => {
                let action = match request.mode {
                    DeployMode::Execute => AuditAction::TableCreated,
                    DeployMode::Artifacts => AuditAction::ArtifactsWritten,
                };
                self.audit
                    .record(
                        action,
                        &target,
                        true,
                        Some(serde_json::json!({
                            "source": plan.sample.path,
                            "columns": schema.column_names(),
                            "artifacts": artifacts.iter().map(|a| &a.location).collect::<Vec<_>>(),
                        })),
                    )
                    .await;
                Ok(CreateOutcome {
                    mode: request.mode,
                    schema,
                    ddl,
                    artifacts,
                })
            }
            Err(e) => {
                error!("❌ Create of {} failed: {}", target, e);
                self.audit
                    .record(
                        AuditAction::CreateFailed,
                        &target,
                        false,
                        Some(serde_json::json!({ "code": e.code(), "error": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn execute_create(&self, schema: &TableSchema) -> Result<(), AppError> {
        let table = schema.table_ref();
        self.expire_deletions().await;
        let _lease = self
            .leases
            .acquire(Target::Table(table.clone()).lease_key())?;

        self.ensure_dataset(&schema.dataset).await?;

        let target = table.to_string();
        self.call(&target, "create_table", self.quick(), self.warehouse.create_table(schema))
            .await?
            .map_err(|e| AppError::WarehouseCreateFailed {
                target: target.clone(),
                cause: e.to_string(),
            })?;

        info!("✅ Created table {}", target);
        Ok(())
    }

    async fn write_table_artifacts(&self, schema: &TableSchema) -> Result<Vec<ArtifactReceipt>, AppError> {
        let mut receipts = Vec::new();
        for artifact in self.generator.table_artifacts(schema) {
            self.call(
                &artifact.location,
                "write_artifact",
                self.quick(),
                self.store.write_object(&artifact.location, artifact.content.as_bytes()),
            )
            .await?
            .map_err(|e: CloudError| storage_error("write_artifact", e))?;

            info!("📝 Wrote {:?} to {}", artifact.kind, artifact.location);
            receipts.push(ArtifactReceipt {
                kind: artifact.kind,
                checksum: Some(artifact.checksum()),
                location: artifact.location,
                row_count: None,
                written_at: Utc::now(),
            });
        }
        Ok(receipts)
    }
}

/// The rendered DDL has to create exactly the table being deployed.
fn ensure_ddl_names_target(ddl: &str, qualified_name: &str) -> Result<(), AppError> {
    let expected = format!("CREATE TABLE {} (", qualified_name);
    if ddl.starts_with(&expected) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "generated DDL does not target {}",
            qualified_name
        )))
    }
}
