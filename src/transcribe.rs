//! Speech-to-text contract and backends
//!
//! The worker only sees the `Transcriber` trait; the default backend posts
//! WAV audio to an OpenAI-compatible transcription endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use crate::audio::samples_to_wav;
use crate::config::WhisperConfig;
use crate::{Error, Result};

/// A transcription result
#[derive(Debug, Clone)]
pub struct Transcription {
    /// May be empty or whitespace-only; callers discard such results
    pub text: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Length of the transcribed audio in seconds
    pub duration_s: f32,
}

/// Opaque speech-to-text backend
///
/// Safe to call concurrently with capture; need not be internally parallel.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a PCM buffer
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails; empty text is not an error.
    async fn transcribe(
        &self,
        pcm: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcription>;
}

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcriber backed by an OpenAI-compatible HTTP endpoint
pub struct HttpWhisperTranscriber {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

impl HttpWhisperTranscriber {
    /// Build from the whisper section of the service config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(config: &WhisperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(Error::Http)?;

        let language = match config.language.as_str() {
            "auto" | "" => None,
            lang => Some(lang.to_string()),
        };

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language,
        })
    }
}

#[async_trait]
impl Transcriber for HttpWhisperTranscriber {
    #[allow(clippy::cast_precision_loss)]
    async fn transcribe(
        &self,
        pcm: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcription> {
        let duration_s = pcm.len() as f32 / sample_rate as f32;
        if pcm.is_empty() {
            return Ok(Transcription {
                text: String::new(),
                confidence: 0.0,
                duration_s,
            });
        }

        let wav = samples_to_wav(pcm, sample_rate)?;
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcribe(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = language.map(String::from).or_else(|| self.language.clone()) {
            form = form.text("language", language);
        }

        let mut req = self.client.post(&self.api_url).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            Error::Transcribe(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Transcribe(format!("API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcribe(e.to_string()))?;

        tracing::debug!(transcript = %result.text, "transcription complete");

        // The endpoint reports no per-segment scores; anything it returned
        // survived its own VAD, so report a flat high confidence.
        let confidence = if result.text.trim().is_empty() { 0.0 } else { 0.9 };

        Ok(Transcription {
            text: result.text,
            confidence,
            duration_s,
        })
    }
}

/// Fixed-output transcriber for tests and capture-less bring-up
#[derive(Debug, Clone, Default)]
pub struct StubTranscriber {
    pub text: String,
}

impl StubTranscriber {
    #[must_use]
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    #[allow(clippy::cast_precision_loss)]
    async fn transcribe(
        &self,
        pcm: &[f32],
        sample_rate: u32,
        _language: Option<&str>,
    ) -> Result<Transcription> {
        Ok(Transcription {
            text: self.text.clone(),
            confidence: if self.text.trim().is_empty() { 0.0 } else { 1.0 },
            duration_s: pcm.len() as f32 / sample_rate as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_transcriber() {
        let stub = StubTranscriber::with_text("hello world");
        let result = stub.transcribe(&[0.0; 16_000], 16_000, None).await.unwrap();

        assert_eq!(result.text, "hello world");
        assert!((result.duration_s - 1.0).abs() < 0.001);
        assert!(result.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_stub_empty_text_zero_confidence() {
        let stub = StubTranscriber::default();
        let result = stub.transcribe(&[], 16_000, None).await.unwrap();
        assert!(result.text.is_empty());
        assert!(result.confidence.abs() < f32::EPSILON);
    }
}
