//! REST surface for the job queue: a thin CRUD layer over the store,
//! with publishes delegated to the broker adapter.

pub mod routes;
pub mod server;
pub mod state;

pub use server::Server;
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conveyor_core::Error;

/// Error wrapper translating the core taxonomy into HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", self.0.category(), self.0);
        }

        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}
