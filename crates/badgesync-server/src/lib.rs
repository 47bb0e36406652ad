//! HTTP control surface for the badgesync scheduler.
//!
//! Three routes, consumed by the admin application: trigger a sync now,
//! read the schedule status, change the recurring interval. The scheduler
//! itself lives in badgesync-core; this crate only exposes it.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use badgesync_core::Scheduler;
use tower_http::cors::{Any, CorsLayer};

use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sync", post(routes::sync::trigger_sync))
        .route("/api/sync/status", get(routes::sync::sync_status))
        .route("/api/sync/interval", put(routes::sync::set_interval))
        .layer(cors)
        .with_state(state)
}

/// Start the control API and the recurring scheduler.
pub async fn serve(scheduler: Scheduler, port: u16) -> anyhow::Result<()> {
    let app = build_router(AppState::new(scheduler.clone()));

    scheduler.start().await;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("badgesync control API listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
