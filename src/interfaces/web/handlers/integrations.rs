use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;
use crate::core::vault::PROVIDERS;

fn known_provider(provider: &str) -> bool {
    PROVIDERS.contains(&provider)
}

/// Store (or overwrite) a provider's secrets for a tenant. The body is a
/// map of secret_type to value, e.g. {"api_key": "...", "app_key": "..."}.
pub async fn put_secrets_endpoint(
    Path((org, provider)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<BTreeMap<String, String>>,
) -> Json<serde_json::Value> {
    if !known_provider(&provider) {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("unknown provider '{}'", provider)
        }));
    }
    if payload.is_empty() {
        return Json(serde_json::json!({
            "success": false,
            "error": "no secrets provided"
        }));
    }

    for (secret_type, value) in &payload {
        if let Err(e) = state
            .vault
            .store_secret(&org, &provider, secret_type, value)
            .await
        {
            return Json(serde_json::json!({ "success": false, "error": e.to_string() }));
        }
    }
    Json(serde_json::json!({
        "success": true,
        "message": format!("{} secret(s) stored", payload.len())
    }))
}

/// Which secret types a tenant has for a provider. Names only, never values.
pub async fn get_secret_types_endpoint(
    Path((org, provider)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    if !known_provider(&provider) {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("unknown provider '{}'", provider)
        }));
    }
    match state.vault.list_secret_types(&org, &provider).await {
        Ok(types) => Json(serde_json::json!({
            "success": true,
            "connected": !types.is_empty(),
            "secret_types": types
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_secret_endpoint(
    Path((org, provider, secret_type)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    if !known_provider(&provider) {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("unknown provider '{}'", provider)
        }));
    }
    match state.vault.delete_secret(&org, &provider, &secret_type).await {
        Ok(()) => Json(serde_json::json!({ "success": true, "message": "Secret removed" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_provider_endpoint(
    Path((org, provider)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    if !known_provider(&provider) {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("unknown provider '{}'", provider)
        }));
    }
    match state.vault.delete_provider(&org, &provider).await {
        Ok(deleted) => Json(serde_json::json!({
            "success": true,
            "message": format!("Removed {} secret(s)", deleted)
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
