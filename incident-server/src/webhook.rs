use crate::api::{ApiError, AppState};
use alert_registry::{parse_alert, AlertPayload};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Turns a vendor webhook body into the canonical alert.
pub trait AlertAdapter: Send + Sync + 'static {
    fn parse(&self, payload: &serde_json::Value) -> Result<AlertPayload, String>;
}

pub struct DatadogAdapter;

impl AlertAdapter for DatadogAdapter {
    fn parse(&self, payload: &serde_json::Value) -> Result<AlertPayload, String> {
        parse_alert(payload)
    }
}

pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/api/v1/webhook/datadog", post(handle_datadog))
}

async fn handle_datadog(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "unreadable webhook body");
        ApiError::InvalidPayload(e.body_text())
    })?;
    submit(&state, &DatadogAdapter, &payload).await
}

// No signature check: any caller that can reach the route can open incidents.
async fn submit(
    state: &AppState,
    adapter: &impl AlertAdapter,
    payload: &serde_json::Value,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alert = adapter.parse(payload).map_err(|e| {
        warn!(error = %e, "rejected webhook payload");
        ApiError::InvalidPayload(e)
    })?;
    if !alert.has_known_alert_type() {
        warn!(alert_type = %alert.alert_type, "unrecognized alert_type");
    }
    info!(alert_id = %alert.id, tags = ?alert.tag_list(), "alert accepted");

    let pipeline = Arc::clone(&state.pipeline);
    let incident = tokio::spawn(async move { pipeline.process(&alert).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "incident_id": incident.id,
    })))
}
