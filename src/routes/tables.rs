//! Create and safe-update route handlers

use crate::error::{validation_error, ApiResult};
use crate::lifecycle::{CreateOutcome, CreateTableRequest, EvolveOutcome, EvolveRequest, TablePlan};
use crate::models::{CreateTableBody, EvolveTableBody, PlanTableRequest, SuccessResponse};
use crate::schema::TableRef;
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::info;
use validator::Validate;

/// Sample, infer and recommend. Nothing is written.
pub async fn plan_table(
    State(state): State<SharedState>,
    Json(payload): Json<PlanTableRequest>,
) -> ApiResult<Json<SuccessResponse<TablePlan>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let plan = state
        .orchestrator
        .plan_table(&payload.file_name, &payload.dataset, &payload.table)
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "Proposed schema for {}.{}: {} column(s). Approve to create.",
            payload.dataset,
            payload.table,
            plan.schema.column_names().len()
        ),
        plan,
    )))
}

pub async fn create_table(
    State(state): State<SharedState>,
    Json(payload): Json<CreateTableBody>,
) -> ApiResult<Json<SuccessResponse<CreateOutcome>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let outcome = state
        .orchestrator
        .create_table(CreateTableRequest {
            file_name: payload.file_name,
            dataset: payload.dataset,
            table: payload.table,
            approved: payload.approved,
            layout: payload.layout,
            mode: payload.mode,
        })
        .await?;

    let message = if outcome.artifacts.is_empty() {
        format!("Table {} created", outcome.schema.table_ref())
    } else {
        format!(
            "{} artifact(s) written for {}",
            outcome.artifacts.len(),
            outcome.schema.table_ref()
        )
    };
    info!("{}", message);
    Ok(Json(SuccessResponse::with_data(message, outcome)))
}

pub async fn evolve_table(
    State(state): State<SharedState>,
    Json(payload): Json<EvolveTableBody>,
) -> ApiResult<Json<SuccessResponse<EvolveOutcome>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let outcome = state
        .orchestrator
        .evolve_table(EvolveRequest {
            table: TableRef::new(payload.dataset, payload.table),
            source: payload.schema,
            layout: payload.layout,
            approved: payload.approved,
        })
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "Table {} updated; {} row(s) preserved",
            outcome.schema.table_ref(),
            outcome.rows_after
        ),
        outcome,
    )))
}
