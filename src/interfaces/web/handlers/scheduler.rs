use axum::{Json, extract::State};

use super::super::AppState;

/// External tick: scan for due jobs and dispatch them. Returns immediately
/// with the number dispatched; pipelines run in the background.
pub async fn tick_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dispatched = state.engine.tick().await;
    Json(serde_json::json!({ "success": true, "dispatched": dispatched }))
}
