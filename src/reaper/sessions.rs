//! Open deletion sessions
//!
//! Each destructive request lives in a session keyed by id until it reaches
//! a terminal state. A session owns the target lease, so closing it (or
//! dropping it on abort) frees the target. The confirmation attempt bound
//! is enforced here; the transition function itself never gives up.
//! Sessions the caller abandons are aborted once they outlive the TTL.

use super::{advance, Directive, Phase, ReaperEvent, ReaperState, Target};
use crate::error::AppError;
use crate::lifecycle::lease::Lease;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    opened_at: Instant,
    state: ReaperState,
    _lease: Lease,
}

impl Session {
    pub fn state(&self) -> &ReaperState {
        &self.state
    }

    /// Feed one event to this session's state machine.
    pub fn apply(&mut self, event: ReaperEvent) -> Directive {
        let current = std::mem::replace(&mut self.state, ReaperState::Idle);
        let transition = advance(current, event);
        self.state = transition.state;
        transition.directive
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            phase: self.state.phase(),
            target: self.state.target().cloned(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub phase: Phase,
    pub target: Option<Target>,
    pub created_at: DateTime<Utc>,
}

pub type SessionHandle = Arc<Mutex<Session>>;

pub struct ReaperSessions {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    max_attempts: u32,
    ttl: Duration,
}

impl ReaperSessions {
    pub fn new(max_attempts: u32, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_attempts,
            ttl,
        }
    }

    /// Register a session already advanced past IDLE.
    pub async fn open(&self, state: ReaperState, lease: Lease) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session {
            id,
            created_at: Utc::now(),
            opened_at: Instant::now(),
            state,
            _lease: lease,
        };
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionHandle, AppError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Deletion session {} not found", id)))
    }

    /// Forget a session; its lease is released once the last handle drops.
    pub async fn close(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.lock().await.summary());
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Check a typed phrase. A mismatch leaves the session waiting until the
    /// attempt bound is hit, then aborts and closes it.
    pub async fn confirm(&self, id: Uuid, phrase: &str) -> Result<SessionSummary, AppError> {
        let handle = self.get(id).await?;
        let mut session = handle.lock().await;

        match session.apply(ReaperEvent::Confirm(phrase.to_string())) {
            Directive::AskBackupDecision => {
                info!("✅ Confirmation accepted for session {}", id);
                Ok(session.summary())
            }
            Directive::RetryConfirmation { phrase: expected, mismatches } => {
                let attempts_left = self.max_attempts.saturating_sub(mismatches);
                let target = session
                    .state()
                    .target()
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                if attempts_left == 0 {
                    warn!("Confirmation attempts exhausted for {}; aborting", target);
                    session.apply(ReaperEvent::Cancel(
                        "confirmation attempts exhausted".to_string(),
                    ));
                    drop(session);
                    self.close(id).await;
                }
                Err(AppError::ConfirmationMismatch {
                    target,
                    expected,
                    attempts_left,
                })
            }
            Directive::Rejected(reason) => Err(AppError::InvalidTransition(reason)),
            other => Err(AppError::Internal(format!(
                "unexpected directive after confirmation: {:?}",
                other
            ))),
        }
    }

    /// Abort a session that has not yet been authorized.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> Result<ReaperState, AppError> {
        let handle = self.get(id).await?;
        let mut session = handle.lock().await;
        match session.apply(ReaperEvent::Cancel(reason.to_string())) {
            Directive::Rejected(reason) => Err(AppError::InvalidTransition(reason)),
            _ => {
                let state = session.state().clone();
                drop(session);
                self.close(id).await;
                Ok(state)
            }
        }
    }

    /// Abort and close every session older than the TTL that has not been
    /// authorized yet. Returns the aborted sessions' final states.
    ///
    /// A session whose lock is taken is mid-request and is left alone; once
    /// authorized, a drop is committed and never expires.
    pub async fn expire(&self) -> Vec<(Uuid, ReaperState)> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        sessions.retain(|id, handle| {
            let Ok(mut session) = handle.try_lock() else {
                return true;
            };
            let state = session.state();
            if session.opened_at.elapsed() < self.ttl
                || state.is_terminal()
                || state.phase() == Phase::Authorized
            {
                return true;
            }
            session.apply(ReaperEvent::Cancel("deletion session expired".to_string()));
            warn!("⌛ Deletion session {} expired before completion", id);
            expired.push((*id, session.state().clone()));
            false
        });
        expired
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::lease::TargetLeases;
    use crate::reaper::DestructiveRequest;
    use crate::schema::TableRef;

    async fn open_table_session(
        sessions: &ReaperSessions,
        leases: &TargetLeases,
    ) -> (Uuid, String) {
        let target = Target::Table(TableRef::new("sales", "sales_raw"));
        let lease = leases.acquire(target.lease_key()).unwrap();
        let state = advance(
            ReaperState::Idle,
            ReaperEvent::Request(DestructiveRequest::new(target.clone())),
        )
        .state;
        (sessions.open(state, lease).await, target.lease_key())
    }

    #[tokio::test]
    async fn test_attempts_exhausted_aborts_and_releases() {
        let leases = TargetLeases::new();
        let sessions = ReaperSessions::new(3, Duration::from_secs(60));
        let (id, key) = open_table_session(&sessions, &leases).await;

        for expected_left in [2, 1] {
            match sessions.confirm(id, "yes").await {
                Err(AppError::ConfirmationMismatch { attempts_left, .. }) => {
                    assert_eq!(attempts_left, expected_left)
                }
                other => panic!("expected mismatch, got {:?}", other.map(|s| s.phase)),
            }
            assert!(leases.is_held(&key));
        }

        let err = sessions.confirm(id, "yes").await.unwrap_err();
        assert!(matches!(err, AppError::ConfirmationMismatch { attempts_left: 0, .. }));
        assert!(matches!(sessions.get(id).await, Err(AppError::NotFound(_))));
        assert!(!leases.is_held(&key));
    }

    #[tokio::test]
    async fn test_exact_phrase_advances() {
        let leases = TargetLeases::new();
        let sessions = ReaperSessions::new(3, Duration::from_secs(60));
        let (id, _) = open_table_session(&sessions, &leases).await;

        let summary = sessions
            .confirm(id, "I confirm deletion of table sales.sales_raw")
            .await
            .unwrap();
        assert_eq!(summary.phase, Phase::AwaitingBackupDecision);

        // A second confirmation is not valid any more
        let err = sessions
            .confirm(id, "I confirm deletion of table sales.sales_raw")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_abandoned_session_expires_and_releases() {
        let leases = TargetLeases::new();
        let sessions = ReaperSessions::new(3, Duration::from_millis(20));
        let (id, key) = open_table_session(&sessions, &leases).await;

        assert!(sessions.expire().await.is_empty());
        tokio::time::sleep(Duration::from_millis(40)).await;

        let expired = sessions.expire().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, id);
        assert_eq!(expired[0].1.phase(), Phase::Aborted);
        assert!(matches!(sessions.get(id).await, Err(AppError::NotFound(_))));
        assert!(!leases.is_held(&key));
    }

    #[tokio::test]
    async fn test_session_in_use_is_not_expired() {
        let leases = TargetLeases::new();
        let sessions = ReaperSessions::new(3, Duration::from_millis(20));
        let (id, _) = open_table_session(&sessions, &leases).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let handle = sessions.get(id).await.unwrap();
        let guard = handle.lock().await;
        assert!(sessions.expire().await.is_empty());
        drop(guard);
        assert_eq!(sessions.expire().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_closes_session() {
        let leases = TargetLeases::new();
        let sessions = ReaperSessions::new(3, Duration::from_secs(60));
        let (id, key) = open_table_session(&sessions, &leases).await;

        let state = sessions.cancel(id, "operator aborted").await.unwrap();
        assert_eq!(state.phase(), Phase::Aborted);
        assert!(sessions.list().await.is_empty());
        assert!(!leases.is_held(&key));
    }
}
