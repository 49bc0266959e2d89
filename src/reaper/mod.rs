//! Safety Protocol ("Grim Reaper")
//!
//! Destructive requests walk an explicit state machine:
//!
//! ```text
//! IDLE -> AWAITING_CONFIRMATION -> AWAITING_BACKUP_DECISION -> BACKUP_IN_PROGRESS
//!      -> AUTHORIZED -> EXECUTED | FAILED        (ABORTED from any state before AUTHORIZED)
//! ```
//!
//! `advance` is a pure function: it takes the current state and one event and
//! returns the next state plus a directive telling the caller what to do
//! next. The backup decision is recorded but does not change the path: every
//! request goes through `BACKUP_IN_PROGRESS`. An `Authorization` can only be
//! minted here, after a confirmed backup, and a drop needs one.

pub mod sessions;

pub use sessions::ReaperSessions;

use crate::artifacts::{backup_export_path, tombstone_path, ArtifactKind, ArtifactReceipt};
use crate::schema::TableRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Table(TableRef),
    Dataset { dataset: String },
}

impl Target {
    /// Exact sentence the caller must type back. Embeds the target verbatim.
    pub fn confirmation_phrase(&self) -> String {
        match self {
            Target::Table(table) => format!("I confirm deletion of table {}", table),
            Target::Dataset { dataset } => {
                format!("I confirm nuclear deletion of dataset {}", dataset)
            }
        }
    }

    /// Key used for per-target leases
    pub fn lease_key(&self) -> String {
        match self {
            Target::Table(table) => format!("table:{}", table),
            Target::Dataset { dataset } => format!("dataset:{}", dataset),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Table(table) => write!(f, "table {}", table),
            Target::Dataset { dataset } => write!(f, "dataset {}", dataset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupDecision {
    Pending,
    Accepted,
    Declined,
}

/// Blast radius shown before the confirmation challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentWarning {
    pub tables: Vec<String>,
    pub message: String,
}

impl ContentWarning {
    pub fn for_dataset(dataset: &str, tables: Vec<String>) -> Self {
        let message = if tables.is_empty() {
            format!("Dataset {} is empty.", dataset)
        } else {
            format!(
                "DANGER: Dataset {} contains {} table(s) that will be permanently deleted: {}",
                dataset,
                tables.len(),
                tables.join(", ")
            )
        };
        Self { tables, message }
    }
}

/// One destructive intent, alive for a single request's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestructiveRequest {
    pub target: Target,
    pub required_confirmation_phrase: String,
    pub backup_decision: BackupDecision,
    pub backup_outcome: Option<ArtifactReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_warning: Option<ContentWarning>,
}

impl DestructiveRequest {
    pub fn new(target: Target) -> Self {
        Self {
            required_confirmation_phrase: target.confirmation_phrase(),
            target,
            backup_decision: BackupDecision::Pending,
            backup_outcome: None,
            content_warning: None,
        }
    }

    pub fn with_warning(mut self, warning: ContentWarning) -> Self {
        self.content_warning = Some(warning);
        self
    }
}

/// What has to be written before the drop may run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum MandatoryBackup {
    /// Full table export to the object store
    Export { path: String },
    /// Metadata record of the dataset
    Tombstone { path: String },
}

impl MandatoryBackup {
    pub fn path(&self) -> &str {
        match self {
            MandatoryBackup::Export { path } | MandatoryBackup::Tombstone { path } => path,
        }
    }

    fn expected_kind(&self) -> ArtifactKind {
        match self {
            MandatoryBackup::Export { .. } => ArtifactKind::BackupExport,
            MandatoryBackup::Tombstone { .. } => ArtifactKind::DatasetTombstone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlan {
    pub mandatory: MandatoryBackup,
    /// Extra warehouse snapshot, only when the caller accepted a backup
    pub snapshot: Option<TableRef>,
    pub planned_at: DateTime<Utc>,
}

/// Permission to run exactly one drop. Only `advance` can create one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    request: DestructiveRequest,
    backup: ArtifactReceipt,
}

impl Authorization {
    pub fn target(&self) -> &Target {
        &self.request.target
    }

    pub fn backup(&self) -> &ArtifactReceipt {
        &self.backup
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaperState {
    Idle,
    AwaitingConfirmation {
        request: DestructiveRequest,
        mismatches: u32,
    },
    AwaitingBackupDecision {
        request: DestructiveRequest,
    },
    BackupInProgress {
        request: DestructiveRequest,
        plan: BackupPlan,
    },
    Authorized(Authorization),
    Executed {
        request: DestructiveRequest,
    },
    Aborted {
        target: Target,
        reason: String,
    },
    Failed {
        target: Target,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    AwaitingConfirmation,
    AwaitingBackupDecision,
    BackupInProgress,
    Authorized,
    Executed,
    Aborted,
    Failed,
}

impl ReaperState {
    pub fn phase(&self) -> Phase {
        match self {
            ReaperState::Idle => Phase::Idle,
            ReaperState::AwaitingConfirmation { .. } => Phase::AwaitingConfirmation,
            ReaperState::AwaitingBackupDecision { .. } => Phase::AwaitingBackupDecision,
            ReaperState::BackupInProgress { .. } => Phase::BackupInProgress,
            ReaperState::Authorized(_) => Phase::Authorized,
            ReaperState::Executed { .. } => Phase::Executed,
            ReaperState::Aborted { .. } => Phase::Aborted,
            ReaperState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReaperState::Executed { .. } | ReaperState::Aborted { .. } | ReaperState::Failed { .. }
        )
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            ReaperState::Idle => None,
            ReaperState::AwaitingConfirmation { request, .. }
            | ReaperState::AwaitingBackupDecision { request }
            | ReaperState::BackupInProgress { request, .. }
            | ReaperState::Executed { request } => Some(&request.target),
            ReaperState::Authorized(auth) => Some(auth.target()),
            ReaperState::Aborted { target, .. } | ReaperState::Failed { target, .. } => Some(target),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReaperEvent {
    Request(DestructiveRequest),
    Confirm(String),
    DecideBackup {
        decision: BackupDecision,
        at: DateTime<Utc>,
    },
    BackupConfirmed(ArtifactReceipt),
    BackupFailed(String),
    DropSucceeded,
    DropFailed(String),
    Cancel(String),
}

impl ReaperEvent {
    fn name(&self) -> &'static str {
        match self {
            ReaperEvent::Request(_) => "request",
            ReaperEvent::Confirm(_) => "confirm",
            ReaperEvent::DecideBackup { .. } => "decide_backup",
            ReaperEvent::BackupConfirmed(_) => "backup_confirmed",
            ReaperEvent::BackupFailed(_) => "backup_failed",
            ReaperEvent::DropSucceeded => "drop_succeeded",
            ReaperEvent::DropFailed(_) => "drop_failed",
            ReaperEvent::Cancel(_) => "cancel",
        }
    }
}

/// What the caller has to do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Ask the caller to type `phrase` exactly
    Challenge { phrase: String },
    /// Phrase did not match; state unchanged
    RetryConfirmation { phrase: String, mismatches: u32 },
    /// Ask whether an additional warehouse snapshot is wanted
    AskBackupDecision,
    /// Write the backup, then report `BackupConfirmed` or `BackupFailed`
    RunBackup(BackupPlan),
    /// Issue the warehouse drop using the authorization in the state
    ExecuteDrop,
    /// Terminal state reached
    Finished,
    /// Event not valid in this state; state unchanged
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: ReaperState,
    pub directive: Directive,
}

impl Transition {
    fn to(state: ReaperState, directive: Directive) -> Self {
        Self { state, directive }
    }
}

/// Feed one event into the state machine.
pub fn advance(state: ReaperState, event: ReaperEvent) -> Transition {
    let from = state.phase();
    let event_name = event.name();
    let transition = step(state, event);
    debug!(
        ?from,
        to = ?transition.state.phase(),
        event = event_name,
        "reaper transition"
    );
    transition
}

fn step(state: ReaperState, event: ReaperEvent) -> Transition {
    match (state, event) {
        (ReaperState::Idle, ReaperEvent::Request(request)) => {
            let phrase = request.required_confirmation_phrase.clone();
            info!("☠️  Destructive request received for {}", request.target);
            Transition::to(
                ReaperState::AwaitingConfirmation {
                    request,
                    mismatches: 0,
                },
                Directive::Challenge { phrase },
            )
        }

        (ReaperState::AwaitingConfirmation { request, mismatches }, ReaperEvent::Confirm(phrase)) => {
            if phrase == request.required_confirmation_phrase {
                Transition::to(
                    ReaperState::AwaitingBackupDecision { request },
                    Directive::AskBackupDecision,
                )
            } else {
                let mismatches = mismatches + 1;
                let phrase = request.required_confirmation_phrase.clone();
                Transition::to(
                    ReaperState::AwaitingConfirmation { request, mismatches },
                    Directive::RetryConfirmation { phrase, mismatches },
                )
            }
        }

        (ReaperState::AwaitingBackupDecision { mut request }, ReaperEvent::DecideBackup { decision, at }) => {
            // The decision is recorded but never skips the mandatory step.
            request.backup_decision = decision;
            let (mandatory, snapshot) = match &request.target {
                Target::Table(table) => {
                    let snapshot = (decision == BackupDecision::Accepted).then(|| {
                        TableRef::new(
                            &table.dataset,
                            format!("{}_snapshot_{}", table.table, at.format("%Y%m%d%H%M%S")),
                        )
                    });
                    (
                        MandatoryBackup::Export {
                            path: backup_export_path(table, at),
                        },
                        snapshot,
                    )
                }
                Target::Dataset { dataset } => (
                    MandatoryBackup::Tombstone {
                        path: tombstone_path(dataset),
                    },
                    None,
                ),
            };
            let plan = BackupPlan {
                mandatory,
                snapshot,
                planned_at: at,
            };
            Transition::to(
                ReaperState::BackupInProgress {
                    request,
                    plan: plan.clone(),
                },
                Directive::RunBackup(plan),
            )
        }

        (ReaperState::BackupInProgress { mut request, plan }, ReaperEvent::BackupConfirmed(receipt)) => {
            if receipt.location != plan.mandatory.path() || receipt.kind != plan.mandatory.expected_kind() {
                let reason = format!(
                    "backup receipt for '{}' does not match planned {:?} at '{}'",
                    receipt.location,
                    plan.mandatory.expected_kind(),
                    plan.mandatory.path()
                );
                return Transition::to(
                    ReaperState::Failed {
                        target: request.target,
                        reason,
                    },
                    Directive::Finished,
                );
            }
            request.backup_outcome = Some(receipt.clone());
            Transition::to(
                ReaperState::Authorized(Authorization {
                    request,
                    backup: receipt,
                }),
                Directive::ExecuteDrop,
            )
        }

        (ReaperState::BackupInProgress { request, .. }, ReaperEvent::BackupFailed(cause)) => Transition::to(
            ReaperState::Failed {
                target: request.target,
                reason: format!("backup failed: {}", cause),
            },
            Directive::Finished,
        ),

        (ReaperState::Authorized(auth), ReaperEvent::DropSucceeded) => Transition::to(
            ReaperState::Executed {
                request: auth.request,
            },
            Directive::Finished,
        ),

        (ReaperState::Authorized(auth), ReaperEvent::DropFailed(cause)) => Transition::to(
            ReaperState::Failed {
                target: auth.request.target,
                reason: format!("drop failed: {}", cause),
            },
            Directive::Finished,
        ),

        (ReaperState::Idle, ReaperEvent::Cancel(reason)) => Transition::to(
            ReaperState::Idle,
            Directive::Rejected(format!("nothing to cancel: {}", reason)),
        ),

        (
            ReaperState::AwaitingConfirmation { request, .. }
            | ReaperState::AwaitingBackupDecision { request }
            | ReaperState::BackupInProgress { request, .. },
            ReaperEvent::Cancel(reason),
        ) => {
            let target = request.target;
            info!("🛑 Destructive request for {} aborted: {}", target, reason);
            Transition::to(ReaperState::Aborted { target, reason }, Directive::Finished)
        }

        (state @ ReaperState::Authorized(_), ReaperEvent::Cancel(_)) => Transition::to(
            state,
            Directive::Rejected(
                "backup is complete and the drop is committed; it can no longer be cancelled".to_string(),
            ),
        ),

        (state, event) => {
            let message = format!("event '{}' is not valid in state {:?}", event.name(), state.phase());
            Transition::to(state, Directive::Rejected(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn table_target() -> Target {
        Target::Table(TableRef::new("sales", "sales_raw"))
    }

    fn requested(target: Target) -> ReaperState {
        advance(ReaperState::Idle, ReaperEvent::Request(DestructiveRequest::new(target))).state
    }

    fn confirmed(target: Target) -> ReaperState {
        let phrase = target.confirmation_phrase();
        advance(requested(target), ReaperEvent::Confirm(phrase)).state
    }

    fn receipt_for(plan: &BackupPlan) -> ArtifactReceipt {
        ArtifactReceipt {
            kind: plan.mandatory.expected_kind(),
            location: plan.mandatory.path().to_string(),
            checksum: None,
            row_count: Some(3),
            written_at: at(),
        }
    }

    #[test]
    fn test_confirmation_phrases_embed_target() {
        assert_eq!(
            table_target().confirmation_phrase(),
            "I confirm deletion of table sales.sales_raw"
        );
        assert_eq!(
            Target::Dataset { dataset: "legacy_data".into() }.confirmation_phrase(),
            "I confirm nuclear deletion of dataset legacy_data"
        );
    }

    #[test]
    fn test_request_issues_challenge() {
        let t = advance(
            ReaperState::Idle,
            ReaperEvent::Request(DestructiveRequest::new(table_target())),
        );
        assert_eq!(t.state.phase(), Phase::AwaitingConfirmation);
        assert_eq!(
            t.directive,
            Directive::Challenge {
                phrase: "I confirm deletion of table sales.sales_raw".to_string()
            }
        );
    }

    #[test]
    fn test_near_miss_phrases_keep_state() {
        let near_misses = [
            "yes",
            "YES",
            "i confirm deletion of table sales.sales_raw",
            "I confirm deletion of table sales.sales_raw ",
            "I confirm deletion of table sales.sales_raw2",
            "I confirm deletion of table other.sales_raw",
            "I confirm deletion of sales_raw",
            "",
        ];
        let mut state = requested(table_target());
        for (i, phrase) in near_misses.iter().enumerate() {
            let t = advance(state, ReaperEvent::Confirm(phrase.to_string()));
            assert_eq!(t.state.phase(), Phase::AwaitingConfirmation, "phrase {:?}", phrase);
            assert!(matches!(
                t.directive,
                Directive::RetryConfirmation { mismatches, .. } if mismatches == i as u32 + 1
            ));
            state = t.state;
        }
    }

    #[test]
    fn test_declined_backup_still_requires_export() {
        let t = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Declined,
                at: at(),
            },
        );
        assert_eq!(t.state.phase(), Phase::BackupInProgress);
        match t.directive {
            Directive::RunBackup(plan) => {
                assert_eq!(
                    plan.mandatory,
                    MandatoryBackup::Export {
                        path: "backup/bq_table/sales_raw/20261019T120000Z/sales.sales_raw.csv".to_string()
                    }
                );
                assert!(plan.snapshot.is_none());
            }
            other => panic!("expected RunBackup, got {:?}", other),
        }
    }

    #[test]
    fn test_accepted_backup_adds_snapshot() {
        let t = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Accepted,
                at: at(),
            },
        );
        let ReaperState::BackupInProgress { request, plan } = t.state else {
            panic!("expected BackupInProgress");
        };
        assert_eq!(request.backup_decision, BackupDecision::Accepted);
        assert_eq!(
            plan.snapshot,
            Some(TableRef::new("sales", "sales_raw_snapshot_20261019120000"))
        );
    }

    #[test]
    fn test_dataset_backup_is_tombstone() {
        let target = Target::Dataset {
            dataset: "legacy_data".into(),
        };
        let t = advance(
            confirmed(target),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Pending,
                at: at(),
            },
        );
        let Directive::RunBackup(plan) = t.directive else {
            panic!("expected RunBackup");
        };
        assert_eq!(
            plan.mandatory,
            MandatoryBackup::Tombstone {
                path: "dataset_generation/json/legacy_data.json".to_string()
            }
        );
    }

    #[test]
    fn test_backup_failure_never_authorizes() {
        let in_progress = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Declined,
                at: at(),
            },
        )
        .state;
        let t = advance(in_progress, ReaperEvent::BackupFailed("bucket gone".into()));
        assert_eq!(t.state.phase(), Phase::Failed);

        // Nothing can move a failed request forward
        let t = advance(t.state, ReaperEvent::DropSucceeded);
        assert_eq!(t.state.phase(), Phase::Failed);
        assert!(matches!(t.directive, Directive::Rejected(_)));
    }

    #[test]
    fn test_mismatched_receipt_fails() {
        let t = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Declined,
                at: at(),
            },
        );
        let Directive::RunBackup(plan) = t.directive else {
            panic!("expected RunBackup");
        };
        let mut receipt = receipt_for(&plan);
        receipt.location = "backup/elsewhere.csv".to_string();
        let t = advance(t.state, ReaperEvent::BackupConfirmed(receipt));
        assert_eq!(t.state.phase(), Phase::Failed);
    }

    #[test]
    fn test_executed_only_via_completed_backup() {
        // Every event sent to a state before BACKUP_IN_PROGRESS that claims
        // the drop happened is rejected.
        for state in [
            ReaperState::Idle,
            requested(table_target()),
            confirmed(table_target()),
        ] {
            let phase = state.phase();
            let t = advance(state, ReaperEvent::DropSucceeded);
            assert_eq!(t.state.phase(), phase);
            let t = advance(
                t.state,
                ReaperEvent::BackupConfirmed(ArtifactReceipt {
                    kind: ArtifactKind::BackupExport,
                    location: "x".into(),
                    checksum: None,
                    row_count: None,
                    written_at: at(),
                }),
            );
            assert_ne!(t.state.phase(), Phase::Authorized);
        }

        let t = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Declined,
                at: at(),
            },
        );
        let Directive::RunBackup(plan) = t.directive else {
            panic!("expected RunBackup");
        };
        let t = advance(t.state, ReaperEvent::BackupConfirmed(receipt_for(&plan)));
        assert_eq!(t.state.phase(), Phase::Authorized);
        assert_eq!(t.directive, Directive::ExecuteDrop);
        let ReaperState::Authorized(auth) = &t.state else {
            panic!("expected Authorized");
        };
        assert_eq!(auth.target(), &table_target());
        assert_eq!(auth.backup(), &receipt_for(&plan));

        let t = advance(t.state, ReaperEvent::DropSucceeded);
        let ReaperState::Executed { request } = t.state else {
            panic!("expected Executed");
        };
        assert_eq!(request.backup_outcome, Some(receipt_for(&plan)));
    }

    #[test]
    fn test_cancel_before_and_after_authorization() {
        let t = advance(confirmed(table_target()), ReaperEvent::Cancel("changed my mind".into()));
        assert_eq!(t.state.phase(), Phase::Aborted);

        let t = advance(
            confirmed(table_target()),
            ReaperEvent::DecideBackup {
                decision: BackupDecision::Declined,
                at: at(),
            },
        );
        let Directive::RunBackup(plan) = t.directive else {
            panic!("expected RunBackup");
        };
        let authorized = advance(t.state, ReaperEvent::BackupConfirmed(receipt_for(&plan))).state;
        let t = advance(authorized, ReaperEvent::Cancel("too late".into()));
        assert_eq!(t.state.phase(), Phase::Authorized);
        assert!(matches!(t.directive, Directive::Rejected(_)));
    }
}
