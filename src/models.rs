//! Request/response DTOs for the HTTP surface
//!
//! Bodies are validated with `validator` before they reach the orchestrator.

use crate::lifecycle::{DeployMode, LayoutChoice, SchemaSource};
use crate::reaper::BackupDecision;
use crate::schema::IDENTIFIER;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Generic success envelope
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlanTableRequest {
    #[validate(length(min = 1, message = "File name is required"))]
    pub file_name: String,
    #[validate(custom(function = "validate_identifier"))]
    pub dataset: String,
    #[validate(custom(function = "validate_identifier"))]
    pub table: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableBody {
    #[validate(length(min = 1, message = "File name is required"))]
    pub file_name: String,
    #[validate(custom(function = "validate_identifier"))]
    pub dataset: String,
    #[validate(custom(function = "validate_identifier"))]
    pub table: String,
    /// Explicit answer to the plan; `false` is a no-op
    pub approved: bool,
    #[serde(default)]
    pub layout: LayoutChoice,
    #[serde(default)]
    pub mode: DeployMode,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EvolveTableBody {
    #[validate(custom(function = "validate_identifier"))]
    pub dataset: String,
    #[validate(custom(function = "validate_identifier"))]
    pub table: String,
    pub schema: SchemaSource,
    #[serde(default)]
    pub layout: LayoutChoice,
    pub approved: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TableDeletionBody {
    #[validate(custom(function = "validate_identifier"))]
    pub dataset: String,
    #[validate(custom(function = "validate_identifier"))]
    pub table: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDeletionBody {
    #[validate(custom(function = "validate_identifier"))]
    pub dataset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    /// Compared byte for byte; not trimmed
    pub phrase: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDecisionBody {
    /// Whether an extra warehouse snapshot is wanted. The export runs either way.
    pub accept_backup: bool,
}

impl BackupDecisionBody {
    pub fn decision(&self) -> BackupDecision {
        if self.accept_backup {
            BackupDecision::Accepted
        } else {
            BackupDecision::Declined
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub target: Option<String>,
    pub limit: Option<usize>,
}

/// Dataset and table names as the warehouse accepts them
fn validate_identifier(name: &str) -> Result<(), validator::ValidationError> {
    if !IDENTIFIER.is_match(name) {
        let mut err = validator::ValidationError::new("invalid_identifier");
        err.message = Some(
            "Must start with a letter or underscore and contain only letters, digits, underscores."
                .into(),
        );
        return Err(err);
    }
    Ok(())
}
