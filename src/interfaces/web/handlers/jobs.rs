use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;
use crate::core::store::types::{JobType, JobUpdate, NewJob, NotifyOn};

#[derive(serde::Deserialize)]
pub struct CreateJobRequest {
    name: String,
    job_type: String,
    schedule_interval_minutes: i64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    config: Option<serde_json::Value>,
    notify_on: Option<String>,
    slack_channel_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_job_endpoint(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Json<serde_json::Value> {
    let Some(job_type) = JobType::parse(&payload.job_type) else {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("unknown job_type '{}'", payload.job_type)
        }));
    };
    let notify_on = match payload.notify_on.as_deref() {
        None => NotifyOn::Issues,
        Some(raw) => match NotifyOn::parse(raw) {
            Some(n) => n,
            None => {
                return Json(serde_json::json!({
                    "success": false,
                    "error": format!("unknown notify_on '{}'", raw)
                }));
            }
        },
    };

    let new = NewJob {
        org_id: org,
        name: payload.name,
        job_type,
        schedule_interval_minutes: payload.schedule_interval_minutes,
        enabled: payload.enabled,
        config: payload.config.unwrap_or_else(|| serde_json::json!({})),
        notify_on,
        slack_channel_id: payload.slack_channel_id,
    };

    match state.store.create_job(new).await {
        Ok(job) => Json(serde_json::json!({ "success": true, "job": job })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn list_jobs_endpoint(
    Path(org): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.list_jobs(&org).await {
        Ok(jobs) => Json(serde_json::json!({ "success": true, "jobs": jobs })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_job_endpoint(
    Path((org, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_job(&org, &job_id).await {
        Ok(Some(job)) => Json(serde_json::json!({ "success": true, "job": job })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Job not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(serde::Deserialize)]
pub struct UpdateJobRequest {
    name: Option<String>,
    schedule_interval_minutes: Option<i64>,
    enabled: Option<bool>,
    config: Option<serde_json::Value>,
    notify_on: Option<String>,
    // Double Option: absent = unchanged, null = clear.
    #[serde(default, with = "double_option")]
    slack_channel_id: Option<Option<String>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(de).map(Some)
    }
}

pub async fn update_job_endpoint(
    Path((org, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateJobRequest>,
) -> Json<serde_json::Value> {
    let notify_on = match payload.notify_on.as_deref() {
        None => None,
        Some(raw) => match NotifyOn::parse(raw) {
            Some(n) => Some(n),
            None => {
                return Json(serde_json::json!({
                    "success": false,
                    "error": format!("unknown notify_on '{}'", raw)
                }));
            }
        },
    };

    let update = JobUpdate {
        name: payload.name,
        schedule_interval_minutes: payload.schedule_interval_minutes,
        enabled: payload.enabled,
        config: payload.config,
        notify_on,
        slack_channel_id: payload.slack_channel_id,
    };

    match state.store.update_job(&org, &job_id, update).await {
        Ok(Some(job)) => Json(serde_json::json!({ "success": true, "job": job })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Job not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_job_endpoint(
    Path((org, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.delete_job(&org, &job_id).await {
        Ok(true) => Json(serde_json::json!({ "success": true, "message": "Job deleted" })),
        Ok(false) => Json(serde_json::json!({ "success": false, "error": "Job not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

/// Manual trigger. Returns the run id as soon as the run row exists; the
/// pipeline itself continues in the background.
pub async fn run_job_now_endpoint(
    Path((org, job_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.engine.run_job_now(&org, &job_id).await {
        Ok(run_id) => Json(serde_json::json!({ "success": true, "run_id": run_id })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
