use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// Request authentication: the internal token (header or bearer) always
/// passes; otherwise open access is allowed only when bound to loopback,
/// which is safe for local single-operator deployments.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(header) = req.headers().get("x-opswatch-internal-token")
        && let Ok(val) = header.to_str()
        && val == state.internal_token
    {
        return next.run(req).await;
    }

    if let Some(bearer) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        && bearer == state.internal_token
    {
        return next.run(req).await;
    }

    let is_loopback = state.api_host == "127.0.0.1"
        || state.api_host == "::1"
        || state.api_host == "localhost";
    if is_loopback {
        return next.run(req).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "success": false,
            "error": "Missing or invalid credentials. Use: Bearer <token>"
        })),
    )
        .into_response()
}
