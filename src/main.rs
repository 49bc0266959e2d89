//! Raw Architect API - Data Lifecycle Governance
//!
//! Turns raw landing files into warehouse tables and guards every
//! destructive operation behind an explicit safety protocol:
//! - Create: sample a landing file, infer a schema, recommend a layout,
//!   then execute or write reviewable artifacts once approved
//! - Safe update: export, drop, recreate, reload and verify row counts
//! - Delete: typed confirmation phrase, mandatory backup, authorized drop
//!
//! The service runs against an in-process simulated object store and
//! warehouse. Point `LOCAL_SEED_DIR` at a folder of CSV files to populate
//! the landing folder at boot.

mod artifacts;
mod audit;
mod cloud;
mod config;
mod error;
mod lifecycle;
mod models;
mod reaper;
mod routes;
mod sample;
mod schema;
mod state;

use crate::cloud::SimulatedCloud;
use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Raw Architect - Data Lifecycle Governance...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let cloud = Arc::new(SimulatedCloud::new());
    if let Some(dir) = &settings.seed_dir {
        let seeded = seed_landing(&cloud, Path::new(dir), &settings.lifecycle.landing_prefix).await?;
        info!("🌱 Seeded {} landing file(s) from {}", seeded, dir);
    } else {
        warn!("⚠️  LOCAL_SEED_DIR not set, landing folder starts empty");
    }

    let state = Arc::new(AppState::new(
        settings.lifecycle.clone(),
        cloud.clone(),
        cloud,
    ));

    spawn_session_sweeper(
        Arc::clone(&state),
        settings.lifecycle.deletion_session_ttl.min(Duration::from_secs(30)),
    );

    let app = create_router(state, &settings);
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Discovery ───");
    info!("   GET    /api/landing                    - List landing files");
    info!("   GET    /api/datasets                   - List datasets");
    info!("   GET    /api/datasets/{{dataset}}         - Dataset existence and tables");
    info!("   GET    /api/datasets/{{dataset}}/tables  - List tables");
    info!("   GET    /api/audit                      - Audit trail");
    info!("");
    info!("   ─── Create / Safe Update ───");
    info!("   POST   /api/tables/plan                - Propose schema and layout");
    info!("   POST   /api/tables                     - Create table or write artifacts");
    info!("   POST   /api/tables/evolve              - Safe schema update");
    info!("");
    info!("   ─── Safety Protocol ───");
    info!("   GET    /api/deletions                  - Deletions in progress");
    info!("   POST   /api/deletions/tables           - Start table deletion");
    info!("   POST   /api/deletions/datasets         - Start dataset deletion");
    info!("   POST   /api/deletions/{{id}}/confirm     - Type the confirmation phrase");
    info!("   POST   /api/deletions/{{id}}/backup      - Backup decision, then drop");
    info!("   DELETE /api/deletions/{{id}}             - Abort");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,raw_architect=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Copy every regular file in `dir` into the landing folder
async fn seed_landing(cloud: &SimulatedCloud, dir: &Path, prefix: &str) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read seed directory {}: {}", dir.display(), e))?;

    let mut seeded = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let content = tokio::fs::read(entry.path()).await?;
        cloud.put_object(&format!("{}{}", prefix, name), content).await;
        seeded += 1;
    }
    Ok(seeded)
}

/// Periodically abort deletion sessions the caller abandoned
fn spawn_session_sweeper(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let expired = state.orchestrator.expire_deletions().await;
            if expired > 0 {
                info!("⌛ Aborted {} expired deletion session(s)", expired);
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
