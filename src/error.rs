//! Error handling module
//!
//! One error type for every lifecycle flow. Each variant carries the target,
//! the step and the cause so the caller can retry or recover by hand.
//! Nothing here is process-fatal: an error ends the in-flight request only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Source '{path}' is unavailable: {cause}")]
    SourceUnavailable { path: String, cause: String },

    #[error("Source '{0}' has no header line")]
    EmptySource(String),

    #[error("Header of '{0}' yields no usable columns")]
    NoColumns(String),

    #[error("Approval denied for {0}; nothing was changed")]
    ApprovalDenied(String),

    #[error("Confirmation phrase does not match for {target}. Type exactly: \"{expected}\"")]
    ConfirmationMismatch {
        target: String,
        expected: String,
        attempts_left: u32,
    },

    #[error("Backup of {target} failed at '{step}': {cause}. Nothing was dropped")]
    BackupFailed {
        target: String,
        step: String,
        cause: String,
    },

    #[error("Warehouse create failed for {target}: {cause}")]
    WarehouseCreateFailed { target: String, cause: String },

    #[error("Warehouse drop failed for {target}: {cause}")]
    WarehouseDropFailed { target: String, cause: String },

    #[error(
        "Row count mismatch on {target}: expected {expected}, found {actual}. \
         Backup kept at '{backup_path}' for manual recovery"
    )]
    RowCountMismatch {
        target: String,
        expected: u64,
        actual: u64,
        backup_path: String,
    },

    #[error("'{step}' on {target} timed out after {after_ms}ms")]
    Timeout {
        target: String,
        step: String,
        after_ms: u128,
    },

    #[error("{0} is locked by another in-flight operation")]
    TargetBusy(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Object store error during '{step}': {cause}")]
    Storage { step: String, cause: String },

    #[error("Warehouse error during '{step}': {cause}")]
    Warehouse { step: String, cause: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the dialogue harness.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            AppError::EmptySource(_) => "EMPTY_SOURCE",
            AppError::NoColumns(_) => "NO_COLUMNS",
            AppError::ApprovalDenied(_) => "APPROVAL_DENIED",
            AppError::ConfirmationMismatch { .. } => "CONFIRMATION_MISMATCH",
            AppError::BackupFailed { .. } => "BACKUP_FAILED",
            AppError::WarehouseCreateFailed { .. } => "WAREHOUSE_CREATE_FAILED",
            AppError::WarehouseDropFailed { .. } => "WAREHOUSE_DROP_FAILED",
            AppError::RowCountMismatch { .. } => "ROW_COUNT_MISMATCH",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::TargetBusy(_) => "TARGET_BUSY",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Storage { .. } => "STORAGE_ERROR",
            AppError::Warehouse { .. } => "WAREHOUSE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::SourceUnavailable { .. } | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::EmptySource(_)
            | AppError::NoColumns(_)
            | AppError::ConfirmationMismatch { .. }
            | AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ApprovalDenied(_) => StatusCode::BAD_REQUEST,
            AppError::TargetBusy(_) | AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::BackupFailed { .. }
            | AppError::WarehouseCreateFailed { .. }
            | AppError::WarehouseDropFailed { .. }
            | AppError::Storage { .. }
            | AppError::Warehouse { .. } => StatusCode::BAD_GATEWAY,
            AppError::RowCountMismatch { .. }
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response structure
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_left: Option<u32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
        }

        let attempts_left = match &self {
            AppError::ConfirmationMismatch { attempts_left, .. } => Some(*attempts_left),
            _ => None,
        };

        let body = Json(ErrorResponse {
            success: false,
            message: self.to_string(),
            code: self.code(),
            attempts_left,
        });

        (status, body).into_response()
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias for lifecycle operations and handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}
