use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;

pub async fn list_runs_endpoint(
    Path((org, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.list_runs(&org, &job_id).await {
        Ok(runs) => Json(serde_json::json!({ "success": true, "runs": runs })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_run_endpoint(
    Path((org, run_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_run(&org, &run_id).await {
        Ok(Some(run)) => Json(serde_json::json!({ "success": true, "run": run })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Run not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
