//! System statistics route.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::ApiError;
use conveyor_core::QueueBreakdown;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pending_jobs: i64,
    pub running_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub dead_letter_count: i64,
    pub active_workers: usize,
    pub queue_breakdown: QueueBreakdown,
}

/// Get system statistics.
///
/// GET /api/v1/stats
async fn get_statistics(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.store.stats().await?;

    // Liveness keys expire on their own; a failed scan just reports zero
    let active_workers = match state.cache.active_workers().await {
        Ok(workers) => workers.len(),
        Err(e) => {
            tracing::warn!("Failed to list active workers: {}", e);
            0
        }
    };

    Ok(Json(StatsResponse {
        pending_jobs: stats.pending_jobs,
        running_jobs: stats.running_jobs,
        completed_jobs: stats.completed_jobs,
        failed_jobs: stats.failed_jobs,
        dead_letter_count: stats.dead_letter_count,
        active_workers,
        queue_breakdown: stats.queue_breakdown,
    }))
}

/// Router for statistics routes
pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(get_statistics))
}
