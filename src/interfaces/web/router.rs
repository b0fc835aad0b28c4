use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{integrations, jobs, runs, scheduler};

fn build_localhost_cors(api_host: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://{}", api_host),
        "http://127.0.0.1".to_string(),
        "http://localhost".to_string(),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new().allow_origin(origins).allow_methods([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
    ])
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/orgs/{org}/jobs",
            get(jobs::list_jobs_endpoint).post(jobs::create_job_endpoint),
        )
        .route(
            "/api/orgs/{org}/jobs/{job_id}",
            get(jobs::get_job_endpoint)
                .patch(jobs::update_job_endpoint)
                .delete(jobs::delete_job_endpoint),
        )
        .route(
            "/api/orgs/{org}/jobs/{job_id}/run",
            post(jobs::run_job_now_endpoint),
        )
        .route(
            "/api/orgs/{org}/jobs/{job_id}/runs",
            get(runs::list_runs_endpoint),
        )
        .route("/api/orgs/{org}/runs/{run_id}", get(runs::get_run_endpoint))
        .route("/api/scheduler/tick", post(scheduler::tick_endpoint))
        .route(
            "/api/orgs/{org}/integrations/{provider}",
            put(integrations::put_secrets_endpoint)
                .get(integrations::get_secret_types_endpoint)
                .delete(integrations::delete_provider_endpoint),
        )
        .route(
            "/api/orgs/{org}/integrations/{provider}/{secret_type}",
            axum::routing::delete(integrations::delete_secret_endpoint),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(build_localhost_cors(&state.api_host))
        .with_state(state)
}
