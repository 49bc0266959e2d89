//! Delete table / delete dataset
//!
//! Both flows run through a safety protocol session:
//! begin (lease + challenge) -> confirm (exact phrase) -> backup decision,
//! which runs the mandatory backup, obtains the authorization and issues the
//! drop. A table is exported before it is dropped whatever the caller
//! decided; a dataset gets a tombstone of its contents first.

use super::lease::Lease;
use super::Orchestrator;
use crate::artifacts::{ArtifactKind, ArtifactReceipt};
use crate::audit::AuditAction;
use crate::error::AppError;
use crate::reaper::sessions::SessionSummary;
use crate::reaper::{
    advance, Authorization, BackupDecision, BackupPlan, ContentWarning, DestructiveRequest,
    Directive, MandatoryBackup, Phase, ReaperEvent, ReaperState, Target,
};
use crate::schema::{validate_identifier, TableRef};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Handed back when a destructive flow starts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionTicket {
    pub id: Uuid,
    pub target: Target,
    pub phase: Phase,
    /// Sentence the caller must type back exactly
    pub confirmation_phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_warning: Option<ContentWarning>,
    pub attempts_allowed: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionOutcome {
    pub id: Uuid,
    pub target: Target,
    pub phase: Phase,
    pub backup_decision: BackupDecision,
    pub backup: ArtifactReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TableRef>,
}

impl Orchestrator {
    pub async fn begin_table_deletion(&self, table: TableRef) -> Result<DeletionTicket, AppError> {
        validate_identifier("dataset", &table.dataset)?;
        validate_identifier("table", &table.table)?;
        self.expire_deletions().await;

        let target = Target::Table(table.clone());
        let lease = self.leases.acquire(target.lease_key())?;

        let tables = self.list_tables(&table.dataset).await?;
        if !tables.contains(&table.table) {
            return Err(AppError::NotFound(format!("Table {} not found", table)));
        }

        self.open_session(DestructiveRequest::new(target), lease).await
    }

    pub async fn begin_dataset_deletion(&self, dataset: &str) -> Result<DeletionTicket, AppError> {
        validate_identifier("dataset", dataset)?;
        self.expire_deletions().await;

        let target = Target::Dataset {
            dataset: dataset.to_string(),
        };
        let lease = self.leases.acquire(target.lease_key())?;

        // Blast radius is shown before the challenge.
        let tables = self.list_tables(dataset).await?;
        let warning = ContentWarning::for_dataset(dataset, tables);
        if !warning.tables.is_empty() {
            warn!("☢️  {}", warning.message);
        }

        self.open_session(DestructiveRequest::new(target).with_warning(warning), lease)
            .await
    }

    async fn open_session(
        &self,
        request: DestructiveRequest,
        lease: Lease,
    ) -> Result<DeletionTicket, AppError> {
        let target = request.target.clone();
        let content_warning = request.content_warning.clone();

        let transition = advance(ReaperState::Idle, ReaperEvent::Request(request));
        let confirmation_phrase = match transition.directive {
            Directive::Challenge { phrase } => phrase,
            other => {
                return Err(AppError::Internal(format!(
                    "unexpected directive for a new request: {:?}",
                    other
                )))
            }
        };
        let phase = transition.state.phase();
        let id = self.sessions.open(transition.state, lease).await;

        self.audit
            .record(
                AuditAction::DeletionRequested,
                target_label(&target),
                true,
                Some(serde_json::json!({
                    "session": id,
                    "tables": content_warning.as_ref().map(|w| w.tables.clone()),
                })),
            )
            .await;

        Ok(DeletionTicket {
            id,
            target,
            phase,
            confirmation_phrase,
            content_warning,
            attempts_allowed: self.sessions.max_attempts(),
        })
    }

    pub async fn confirm_deletion(&self, id: Uuid, phrase: &str) -> Result<SessionSummary, AppError> {
        self.expire_deletions().await;
        let label = self
            .sessions
            .get(id)
            .await?
            .lock()
            .await
            .state()
            .target()
            .map(target_label)
            .unwrap_or_default();

        let result = self.sessions.confirm(id, phrase).await;
        if let Err(AppError::ConfirmationMismatch { attempts_left: 0, .. }) = &result {
            self.audit
                .record(
                    AuditAction::DeletionAborted,
                    label,
                    false,
                    Some(serde_json::json!({ "session": id, "reason": "confirmation attempts exhausted" })),
                )
                .await;
        }
        result
    }

    pub async fn cancel_deletion(&self, id: Uuid) -> Result<SessionSummary, AppError> {
        self.expire_deletions().await;
        let state = self.sessions.cancel(id, "cancelled by caller").await?;
        if let Some(target) = state.target() {
            self.audit
                .record(
                    AuditAction::DeletionAborted,
                    target_label(target),
                    true,
                    Some(serde_json::json!({ "session": id, "reason": "cancelled by caller" })),
                )
                .await;
        }
        Ok(SessionSummary {
            id,
            phase: state.phase(),
            target: state.target().cloned(),
            created_at: Utc::now(),
        })
    }

    pub async fn pending_deletions(&self) -> Vec<SessionSummary> {
        self.expire_deletions().await;
        self.sessions.list().await
    }

    /// Abort deletion sessions the caller walked away from, freeing their
    /// targets. Returns how many were aborted.
    pub async fn expire_deletions(&self) -> usize {
        let expired = self.sessions.expire().await;
        for (id, state) in &expired {
            if let Some(target) = state.target() {
                self.audit
                    .record(
                        AuditAction::DeletionAborted,
                        target_label(target),
                        false,
                        Some(serde_json::json!({ "session": id, "reason": "session expired" })),
                    )
                    .await;
            }
        }
        expired.len()
    }

    /// Record the backup decision and drive the rest of the flow: mandatory
    /// backup, authorization, drop. The session is closed on return.
    pub async fn decide_backup(&self, id: Uuid, decision: BackupDecision) -> Result<DeletionOutcome, AppError> {
        self.expire_deletions().await;
        let handle = self.sessions.get(id).await?;
        let mut session = handle.lock().await;

        let plan = match session.apply(ReaperEvent::DecideBackup {
            decision,
            at: Utc::now(),
        }) {
            Directive::RunBackup(plan) => plan,
            Directive::Rejected(reason) => return Err(AppError::InvalidTransition(reason)),
            other => {
                return Err(AppError::Internal(format!(
                    "unexpected directive after backup decision: {:?}",
                    other
                )))
            }
        };
        let target = match session.state().target() {
            Some(target) => target.clone(),
            None => return Err(AppError::Internal("session lost its target".to_string())),
        };
        let label = target_label(&target);

        let backup = self.run_backup(&target, &plan).await;
        let (receipt, cascade) = match backup {
            Ok(done) => done,
            Err(e) => {
                error!("❌ Backup of {} failed, nothing dropped: {}", target, e);
                session.apply(ReaperEvent::BackupFailed(e.to_string()));
                drop(session);
                self.sessions.close(id).await;
                self.record_failure(&label, id, &e).await;
                return Err(e);
            }
        };

        let authorization = match session.apply(ReaperEvent::BackupConfirmed(receipt.clone())) {
            Directive::ExecuteDrop => match session.state() {
                ReaperState::Authorized(auth) => auth.clone(),
                _ => return Err(AppError::Internal("authorized state missing".to_string())),
            },
            other => {
                let e = AppError::BackupFailed {
                    target: label.clone(),
                    step: "verify".to_string(),
                    cause: format!("backup not accepted: {:?}", other),
                };
                drop(session);
                self.sessions.close(id).await;
                self.record_failure(&label, id, &e).await;
                return Err(e);
            }
        };

        // Past this point the drop is committed and cannot be cancelled.
        match self.execute_drop(&authorization, cascade).await {
            Ok(()) => {
                session.apply(ReaperEvent::DropSucceeded);
                let phase = session.state().phase();
                drop(session);
                self.sessions.close(id).await;

                info!("☠️  {} deleted (backup at {})", target, receipt.location);
                self.audit
                    .record(
                        AuditAction::DeletionExecuted,
                        &label,
                        true,
                        Some(serde_json::json!({
                            "session": id,
                            "backupDecision": decision,
                            "backup": receipt.location,
                            "checksum": receipt.checksum,
                            "snapshot": plan.snapshot.as_ref().map(|s| s.to_string()),
                        })),
                    )
                    .await;

                Ok(DeletionOutcome {
                    id,
                    target,
                    phase,
                    backup_decision: decision,
                    backup: receipt,
                    snapshot: plan.snapshot,
                })
            }
            Err(e) => {
                error!("❌ Drop of {} failed after backup: {}", target, e);
                session.apply(ReaperEvent::DropFailed(e.to_string()));
                drop(session);
                self.sessions.close(id).await;
                self.record_failure(&label, id, &e).await;
                Err(e)
            }
        }
    }

    /// Write the mandatory backup (and the optional snapshot).
    ///
    /// Returns the receipt and, for datasets, whether the drop has to cascade.
    async fn run_backup(&self, target: &Target, plan: &BackupPlan) -> Result<(ArtifactReceipt, bool), AppError> {
        let label = target_label(target);
        let backup_failed = |step: &str, cause: String| AppError::BackupFailed {
            target: label.clone(),
            step: step.to_string(),
            cause,
        };

        match (target, &plan.mandatory) {
            (Target::Table(table), MandatoryBackup::Export { path }) => {
                info!("💾 Exporting {} to {} before deletion", table, path);
                let export = self
                    .call(
                        &label,
                        "export",
                        self.config.backup_timeout,
                        self.store.export_table(table, path),
                    )
                    .await?
                    .map_err(|e| backup_failed("export", e.to_string()))?;

                if let Some(snapshot) = &plan.snapshot {
                    info!("📸 Snapshotting {} as {}", table, snapshot);
                    self.call(
                        &label,
                        "snapshot",
                        self.config.backup_timeout,
                        self.warehouse.snapshot_table(table, snapshot),
                    )
                    .await?
                    .map_err(|e| backup_failed("snapshot", e.to_string()))?;
                }

                Ok((
                    ArtifactReceipt {
                        kind: ArtifactKind::BackupExport,
                        location: export.path,
                        checksum: None,
                        row_count: Some(export.row_count),
                        written_at: Utc::now(),
                    },
                    false,
                ))
            }
            (Target::Dataset { dataset }, MandatoryBackup::Tombstone { .. }) => {
                // Listed again under the lease so the tombstone matches what gets dropped.
                let tables = self
                    .call(&label, "list_tables", self.quick(), self.warehouse.list_tables(dataset))
                    .await?
                    .map_err(|e| backup_failed("list_tables", e.to_string()))?;

                let artifact = self
                    .generator
                    .tombstone_artifact(dataset, &tables, plan.planned_at);
                info!("🪦 Writing tombstone for {} to {}", dataset, artifact.location);
                self.call(
                    &label,
                    "tombstone",
                    self.config.backup_timeout,
                    self.store
                        .write_object(&artifact.location, artifact.content.as_bytes()),
                )
                .await?
                .map_err(|e| backup_failed("tombstone", e.to_string()))?;

                Ok((
                    ArtifactReceipt {
                        kind: artifact.kind,
                        checksum: Some(artifact.checksum()),
                        location: artifact.location,
                        row_count: None,
                        written_at: Utc::now(),
                    },
                    !tables.is_empty(),
                ))
            }
            _ => Err(AppError::Internal(format!(
                "backup plan does not fit {}",
                target
            ))),
        }
    }

    /// The only place a drop is issued; it needs an authorization.
    async fn execute_drop(&self, authorization: &Authorization, cascade: bool) -> Result<(), AppError> {
        let label = target_label(authorization.target());
        info!(
            "🔓 Drop of {} authorized against backup {}",
            label,
            authorization.backup().location
        );
        let result = match authorization.target() {
            Target::Table(table) => {
                self.call(&label, "drop_table", self.quick(), self.warehouse.drop_table(table))
                    .await?
            }
            Target::Dataset { dataset } => {
                self.call(
                    &label,
                    "drop_dataset",
                    self.quick(),
                    self.warehouse.drop_dataset(dataset, cascade),
                )
                .await?
            }
        };
        result.map_err(|e| AppError::WarehouseDropFailed {
            target: label,
            cause: e.to_string(),
        })
    }

    async fn record_failure(&self, label: &str, id: Uuid, e: &AppError) {
        self.audit
            .record(
                AuditAction::DeletionFailed,
                label,
                false,
                Some(serde_json::json!({ "session": id, "code": e.code(), "error": e.to_string() })),
            )
            .await;
    }
}

fn target_label(target: &Target) -> String {
    match target {
        Target::Table(table) => table.to_string(),
        Target::Dataset { dataset } => dataset.clone(),
    }
}
