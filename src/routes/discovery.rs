//! Discovery and audit route handlers

use crate::audit::AuditEntry;
use crate::error::ApiResult;
use crate::lifecycle::DatasetInfo;
use crate::models::{AuditQuery, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

const DEFAULT_AUDIT_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameList {
    pub names: Vec<String>,
    pub count: usize,
}

impl From<Vec<String>> for NameList {
    fn from(names: Vec<String>) -> Self {
        Self {
            count: names.len(),
            names,
        }
    }
}

/// Files waiting in the landing folder
pub async fn list_landing(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<NameList>>> {
    let files = state.orchestrator.list_landing().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} landing file(s)", files.len()),
        files.into(),
    )))
}

pub async fn list_datasets(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<NameList>>> {
    let datasets = state.orchestrator.list_datasets().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} dataset(s)", datasets.len()),
        datasets.into(),
    )))
}

pub async fn get_dataset(
    State(state): State<SharedState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<SuccessResponse<DatasetInfo>>> {
    let info = state.orchestrator.dataset_info(&dataset).await?;
    let message = if info.exists {
        format!("Dataset {} exists with {} table(s)", dataset, info.tables.len())
    } else {
        format!("Dataset {} does not exist", dataset)
    };
    Ok(Json(SuccessResponse::with_data(message, info)))
}

pub async fn list_tables(
    State(state): State<SharedState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<SuccessResponse<NameList>>> {
    let tables = state.orchestrator.list_tables(&dataset).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} table(s) in {}", tables.len(), dataset),
        tables.into(),
    )))
}

pub async fn audit_trail(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<AuditEntry>>>> {
    let entries = state
        .audit
        .entries(query.target.as_deref(), query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT))
        .await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} audit entr(ies)", entries.len()),
        entries,
    )))
}
