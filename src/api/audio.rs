//! Audio device selection endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::{auth, ApiState};
use crate::audio;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct DeviceUpdate {
    device_index: usize,
}

/// List input devices and the currently selected index
async fn list_devices(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>> {
    let devices = audio::list_devices()?;
    let current = state.state.audio_device_index()?;

    Ok(Json(json!({
        "ok": true,
        "devices": devices,
        "current": current,
    })))
}

/// Select the capture device by index
async fn set_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<serde_json::Value>> {
    auth::require_admin(&state, &headers)?;

    let devices = audio::list_devices()?;
    if update.device_index >= devices.len() {
        return Err(Error::Config(format!(
            "device index {} out of range ({} devices)",
            update.device_index,
            devices.len()
        )));
    }

    state
        .state
        .set_audio_device_index(update.device_index, "api", None)?;

    Ok(Json(json!({
        "ok": true,
        "device_index": update.device_index,
        "device": devices[update.device_index],
    })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/audio/devices", get(list_devices))
        .route("/audio/device", axum::routing::put(set_device))
        .with_state(state)
}
