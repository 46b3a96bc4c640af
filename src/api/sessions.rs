//! Session inspection endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use super::ApiState;
use crate::Result;

/// List live sessions
async fn list_sessions(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let sessions: Vec<_> = state
        .router
        .sessions()
        .all(now_ms)
        .iter()
        .map(|s| state.router.sessions().snapshot(s, now_ms))
        .collect();

    Ok(Json(json!({ "ok": true, "sessions": sessions })))
}

/// Explicitly close a source's session
async fn end_session(
    State(state): State<Arc<ApiState>>,
    Path(source_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.router.sessions().end(&source_id);
    Ok(Json(json!({ "ok": true, "ended": source_id })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{source_id}/end", post(end_session))
        .with_state(state)
}
