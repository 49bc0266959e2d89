//! Safety protocol route handlers
//!
//! A deletion is a short dialogue: start -> confirm phrase -> backup
//! decision. Each step is one request against the session id returned by
//! the first.

use crate::error::{validation_error, ApiResult};
use crate::lifecycle::{DeletionOutcome, DeletionTicket};
use crate::models::{
    BackupDecisionBody, ConfirmBody, DatasetDeletionBody, SuccessResponse, TableDeletionBody,
};
use crate::reaper::sessions::SessionSummary;
use crate::schema::TableRef;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

pub async fn list_pending(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<Vec<SessionSummary>>>> {
    let sessions = state.orchestrator.pending_deletions().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} deletion(s) in progress", sessions.len()),
        sessions,
    )))
}

pub async fn begin_table_deletion(
    State(state): State<SharedState>,
    Json(payload): Json<TableDeletionBody>,
) -> ApiResult<Json<SuccessResponse<DeletionTicket>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let ticket = state
        .orchestrator
        .begin_table_deletion(TableRef::new(payload.dataset, payload.table))
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("To continue, type exactly: \"{}\"", ticket.confirmation_phrase),
        ticket,
    )))
}

pub async fn begin_dataset_deletion(
    State(state): State<SharedState>,
    Json(payload): Json<DatasetDeletionBody>,
) -> ApiResult<Json<SuccessResponse<DeletionTicket>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let ticket = state
        .orchestrator
        .begin_dataset_deletion(&payload.dataset)
        .await?;
    let warning = ticket
        .content_warning
        .as_ref()
        .map(|w| format!("{} ", w.message))
        .unwrap_or_default();
    Ok(Json(SuccessResponse::with_data(
        format!("{}To continue, type exactly: \"{}\"", warning, ticket.confirmation_phrase),
        ticket,
    )))
}

pub async fn confirm(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmBody>,
) -> ApiResult<Json<SuccessResponse<SessionSummary>>> {
    let summary = state.orchestrator.confirm_deletion(id, &payload.phrase).await?;
    Ok(Json(SuccessResponse::with_data(
        "Confirmed. A backup is taken before deletion in every case; \
         accept to also keep a warehouse snapshot.",
        summary,
    )))
}

pub async fn decide_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BackupDecisionBody>,
) -> ApiResult<Json<SuccessResponse<DeletionOutcome>>> {
    let outcome = state
        .orchestrator
        .decide_backup(id, payload.decision())
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "{} deleted. Backup kept at {}",
            outcome.target, outcome.backup.location
        ),
        outcome,
    )))
}

pub async fn cancel(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<SessionSummary>>> {
    let summary = state.orchestrator.cancel_deletion(id).await?;
    Ok(Json(SuccessResponse::with_data("Deletion aborted; nothing was changed", summary)))
}
