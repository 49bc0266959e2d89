//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::audit::AuditLog;
use crate::cloud::{ObjectStore, Warehouse};
use crate::config::LifecycleConfig;
use crate::lifecycle::Orchestrator;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Drives every create, update and delete flow
    pub orchestrator: Orchestrator,

    /// Outcome trail, shared with the orchestrator
    pub audit: Arc<AuditLog>,
}

impl AppState {
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let audit = Arc::new(AuditLog::new());
        Self {
            orchestrator: Orchestrator::new(config, store, warehouse, Arc::clone(&audit)),
            audit,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
