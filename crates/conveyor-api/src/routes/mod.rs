//! API route modules, mounted under `/api/v1`.

pub mod dead_letters;
pub mod jobs;
pub mod scheduled_jobs;
pub mod stats;

use axum::Router;

use crate::state::AppState;

/// All v1 routes
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(dead_letters::router())
        .merge(scheduled_jobs::router())
        .merge(stats::router())
}
