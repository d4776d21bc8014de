//! HTTP server assembly.

use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::state::AppState;
use conveyor_core::{Result, VERSION};

/// REST API server
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the full application router
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .nest("/api/v1", routes::router())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until the process is shut down
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let app = Self::router(self.state);

        info!("API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(conveyor_core::Error::Io)?;

        Ok(())
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "conveyor",
        "version": VERSION,
        "status": "running",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
