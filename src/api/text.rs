//! Text ingestion and capture-less transcription endpoints

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::ApiState;
use crate::audio::{wav_to_samples, SAMPLE_RATE};
use crate::router::{RouteDecision, TextEvent};
use crate::{Error, Result};

/// Route a text event directly, bypassing the audio pipeline
async fn ingest_text(
    State(state): State<Arc<ApiState>>,
    Json(event): Json<TextEvent>,
) -> Result<Json<RouteDecision>> {
    if event.text.trim().is_empty() {
        return Err(Error::Config("text must not be empty".to_string()));
    }
    if event.source_id.trim().is_empty() {
        return Err(Error::Config("source_id must not be empty".to_string()));
    }

    let decision = state.router.route(&event).await?;
    Ok(Json(decision))
}

/// Transcribe uploaded audio, optionally routing the result
///
/// Multipart fields: `file` (WAV bytes, required) and `route`
/// ("true"/"false", default false).
async fn test_transcribe(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut wav_bytes: Option<Vec<u8>> = None;
    let mut route = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Config(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Config(format!("failed to read audio field: {e}")))?;
                wav_bytes = Some(bytes.to_vec());
            }
            "route" => {
                let value = field.text().await.unwrap_or_default();
                route = value.trim().eq_ignore_ascii_case("true");
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let wav_bytes =
        wav_bytes.ok_or_else(|| Error::Config("multipart field 'file' is required".to_string()))?;
    let pcm = wav_to_samples(&wav_bytes)?;

    let transcription = state
        .transcriber
        .transcribe(&pcm, SAMPLE_RATE, None)
        .await?;

    let decision = if route && !transcription.text.trim().is_empty() {
        let event = TextEvent {
            source_id: state.config.source_id.clone(),
            room: state.config.room.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
            text: transcription.text.clone(),
            confidence: Some(transcription.confidence),
        };
        Some(state.router.route(&event).await?)
    } else {
        None
    };

    Ok(Json(json!({
        "ok": true,
        "text": transcription.text,
        "confidence": transcription.confidence,
        "duration_s": transcription.duration_s,
        "decision": decision,
    })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/text", post(ingest_text))
        .route("/test/transcribe", post(test_transcribe))
        .with_state(state)
}
