//! Target registration endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::{auth, ApiState};
use crate::Result;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    base_url: String,
    #[serde(default)]
    phrases: Vec<String>,
}

/// Register or update a target
async fn register(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>> {
    auth::require_admin(&state, &headers)?;

    let target = state
        .registry
        .upsert(&request.name, &request.base_url, &request.phrases)?;

    Ok(Json(json!({
        "ok": true,
        "registered": target.name,
        "listen_url": target.listen_url(),
        "phrases": target.phrases,
    })))
}

/// List all registered targets
async fn list_targets(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>> {
    let targets: Vec<_> = state
        .registry
        .list()?
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "base_url": t.base_url,
                "listen_url": t.listen_url(),
                "phrases": t.phrases,
            })
        })
        .collect();

    Ok(Json(json!({ "ok": true, "targets": targets })))
}

/// Delete a target
async fn delete_target(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    auth::require_admin(&state, &headers)?;

    state.registry.delete(&name)?;
    Ok(Json(json!({ "ok": true, "deleted": name })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/targets", get(list_targets))
        .route("/targets/{name}", delete(delete_target))
        .with_state(state)
}
