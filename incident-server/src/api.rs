use crate::webhook::webhook_router;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use incident_core::{IncidentPipeline, IncidentRecord, IncidentStore};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub pipeline: Arc<IncidentPipeline>,
    pub store: Arc<IncidentStore>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Full HTTP surface. `static_dir` is served under `/static`, narration lands
/// in its `audio/` subdirectory.
pub fn router(state: AppState, static_dir: &Path, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/incidents", get(list_incidents))
        .route("/api/v1/incidents/", get(list_incidents))
        .merge(webhook_router())
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "app": state.app_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_incidents(State(state): State<AppState>) -> Json<Vec<IncidentRecord>> {
    Json(state.store.list_recent())
}
