//! Liveness and handshake endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::ApiState;

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "service": "echonet",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Discovery and capability snapshot for connecting services
async fn handshake(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let config = &state.config;

    Json(json!({
        "ok": true,
        "discovery": {
            "enabled": config.discovery.enabled,
            "instance_name": config.discovery.instance_name,
            "zone": config.discovery.zone,
            "subzone": config.discovery.subzone,
            "port": config.port,
        },
        "capabilities": {
            "asr": true,
            "target_routing": true,
            "session_management": true,
            "state_tracking": true,
        },
        "config": {
            "session_ttl_seconds": config.session_ttl_seconds,
            "cancel_phrases": config.cancel_phrases,
            "source_id": config.source_id,
        },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/handshake", get(handshake))
        .with_state(state)
}
