//! State inspection and mutation endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::{auth, ApiState};
use crate::state::{ListenMode, StateManager};
use crate::{Error, Result};

/// Body of `PUT /state`
#[derive(Debug, Deserialize)]
struct StateUpdate {
    /// Target requesting the change; must be registered
    target: String,
    /// Originating system (e.g. "api", "llm_response")
    source: String,
    state: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    value: String,
}

/// Current settings snapshot
async fn get_state(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>> {
    let settings = state.state.store().all_settings()?;
    let listen_mode = state.state.listen_mode()?;

    Ok(Json(json!({
        "ok": true,
        "settings": settings,
        "listen_mode": listen_mode,
    })))
}

/// Change the listen mode on behalf of a registered target
async fn put_state(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(update): Json<StateUpdate>,
) -> Result<Json<serde_json::Value>> {
    auth::require_admin(&state, &headers)?;

    if state.registry.get(&update.target)?.is_none() {
        return Err(Error::NotFound(format!(
            "target '{}' is not registered",
            update.target
        )));
    }

    let mode: ListenMode = update.state.parse()?;
    let source = format!("{}:{}", update.source, update.target);
    let reason = update
        .reason
        .unwrap_or_else(|| format!("state change requested by {}", update.target));

    state
        .state
        .set_listen_mode(mode, &source, Some(&reason))?;

    Ok(Json(json!({
        "ok": true,
        "listen_mode": mode,
        "target": update.target,
        "source": update.source,
    })))
}

/// Settings change log, newest first
async fn get_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>> {
    let changes = state
        .state
        .store()
        .history(query.name.as_deref(), query.limit)?;

    Ok(Json(json!({
        "ok": true,
        "count": changes.len(),
        "changes": changes,
    })))
}

/// Runtime-configurable settings
async fn get_config(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>> {
    let mut config = serde_json::Map::new();
    for key in StateManager::config_keys() {
        if let Some(setting) = state.state.store().get(key)? {
            config.insert((*key).to_string(), serde_json::to_value(setting)?);
        }
    }

    Ok(Json(json!({ "ok": true, "config": config })))
}

/// Write one runtime-configurable setting
async fn put_config(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<serde_json::Value>> {
    auth::require_admin(&state, &headers)?;

    state.state.set_config(&key, &update.value, "api", None)?;
    Ok(Json(json!({ "ok": true, "key": key, "value": update.value })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/state", get(get_state).put(put_state))
        .route("/state/history", get(get_history))
        .route("/config", get(get_config))
        .route("/config/{key}", put(put_config))
        .with_state(state)
}
