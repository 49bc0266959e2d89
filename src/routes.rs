//! Route definitions and router setup
//!
//! Each route maps one structured intent onto one orchestrator operation.
//! No conversation state lives here; deletion sessions are addressed by id.

mod deletions;
mod discovery;
mod tables;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))

        // Discovery
        .route("/api/landing", get(discovery::list_landing))
        .route("/api/datasets", get(discovery::list_datasets))
        .route("/api/datasets/{dataset}", get(discovery::get_dataset))
        .route("/api/datasets/{dataset}/tables", get(discovery::list_tables))
        .route("/api/audit", get(discovery::audit_trail))

        // Create / safe update
        .route("/api/tables/plan", post(tables::plan_table))
        .route("/api/tables", post(tables::create_table))
        .route("/api/tables/evolve", post(tables::evolve_table))

        // Safety protocol
        .route("/api/deletions", get(deletions::list_pending))
        .route("/api/deletions/tables", post(deletions::begin_table_deletion))
        .route("/api/deletions/datasets", post(deletions::begin_dataset_deletion))
        .route("/api/deletions/{id}/confirm", post(deletions::confirm))
        .route("/api/deletions/{id}/backup", post(deletions::decide_backup))
        .route("/api/deletions/{id}", delete(deletions::cancel))

        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };
    layer
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
