//! Read-only HTTP debug surface.

use axum::{extract::State, routing::get, Json, Router};
use mirror_core::JobSummary;
use tower_http::cors::CorsLayer;

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/downloads", get(get_downloads))
        .route("/status", get(get_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn get_downloads(State(state): State<SharedState>) -> Json<Vec<JobSummary>> {
    let jobs = state.coordinator.registry().downloads().await;
    Json(jobs.iter().map(|j| j.summary()).collect())
}

pub async fn get_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let coordinator = &state.coordinator;
    let aggregate = coordinator.build_aggregate().await;

    Json(serde_json::json!({
        "jobs": aggregate.job_count(),
        "text": aggregate.text(),
        "timer_running": coordinator.is_status_timer_running(),
    }))
}
