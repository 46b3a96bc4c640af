//! Configuration loaded from `ECHONET_`-prefixed environment variables

use crate::state::ListenMode;
use crate::{Error, Result};

/// EchoNet service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP API
    pub host: String,

    /// HTTP API port
    pub port: u16,

    /// Path to the embedded database file
    pub db_path: String,

    /// Static API key required on every endpoint except `/health`
    pub api_key: String,

    /// If set, mutating admin endpoints additionally require `X-Admin-Key`
    pub admin_key: Option<String>,

    /// Identifier for text events produced by the local microphone
    pub source_id: String,

    /// Room tag attached to locally produced events
    pub room: Option<String>,

    /// Session time-to-live in seconds
    pub session_ttl_seconds: u64,

    /// Phrases that end the current session
    pub cancel_phrases: Vec<String>,

    /// Strip the matched wake phrase from forwarded text
    pub forward_strip_trigger: bool,

    /// Total per-attempt timeout for target fan-out, in seconds
    pub http_timeout_s: u64,

    /// Listen mode applied at startup
    pub initial_listen_mode: ListenMode,

    /// Audio capture and endpointing parameters
    pub audio: AudioConfig,

    /// Transcriber backend parameters
    pub whisper: WhisperConfig,

    /// mDNS advertisement parameters
    pub discovery: DiscoveryConfig,
}

/// Audio capture and endpointing configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Preferred input device index (None = system default)
    pub device_index: Option<usize>,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Capture channel count
    pub channels: u16,

    /// Seconds of contiguous non-speech that end a segment
    pub silence_duration_s: f32,

    /// Minimum segment length in seconds
    pub min_duration_s: f32,

    /// Hard cap on segment length in seconds
    pub max_duration_s: f32,

    /// RMS threshold below which a frame is silent
    pub energy_threshold: f32,

    /// Gate energetic frames through the Silero speech detector
    pub use_ml_vad: bool,
}

/// Transcriber backend configuration
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Model identifier passed to the transcription backend
    pub model: String,

    /// Compute device hint ("cpu", "cuda")
    pub device: String,

    /// Compute precision hint ("int8", "float16")
    pub compute_type: String,

    /// Transcription language, or "auto" for detection
    pub language: String,

    /// OpenAI-compatible transcription endpoint
    pub api_url: String,

    /// Bearer token for the transcription endpoint
    pub api_key: Option<String>,
}

/// mDNS service advertisement configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Whether to advertise the service
    pub enabled: bool,

    /// Instance name (defaults to the machine hostname)
    pub instance_name: String,

    /// Zone label published in TXT records
    pub zone: String,

    /// Subzone label published in TXT records
    pub subzone: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("ECHONET_{name}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid ECHONET_{name}: {raw}"))),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env_var(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(Error::Config(format!("invalid ECHONET_{name}: {raw}"))),
        },
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if any variable fails to parse; this is a startup
    /// failure and the process should exit non-zero.
    pub fn from_env() -> Result<Self> {
        let cancel_phrases = env_var("CANCEL_PHRASES")
            .unwrap_or_else(|| "cancel,never mind,nevermind,stop listening".to_string())
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let initial_listen_mode = match env_var("INITIAL_LISTEN_MODE") {
            Some(raw) => raw.parse()?,
            None => ListenMode::Trigger,
        };

        let device_index = match env_var("AUDIO_DEVICE_INDEX") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                Error::Config(format!("invalid ECHONET_AUDIO_DEVICE_INDEX: {raw}"))
            })?),
            None => None,
        };

        let instance_name = env_var("DISCOVERY_NAME").unwrap_or_else(|| {
            hostname::get().map_or_else(
                |_| "echonet".to_string(),
                |h| h.to_string_lossy().to_string(),
            )
        });

        Ok(Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8123)?,
            db_path: env_var("DB_PATH").unwrap_or_else(|| "echonet.db".to_string()),
            api_key: env_var("API_KEY").unwrap_or_else(|| "dev-change-me".to_string()),
            admin_key: env_var("ADMIN_KEY"),
            source_id: env_var("SOURCE_ID").unwrap_or_else(|| "mic-local".to_string()),
            room: env_var("ROOM"),
            session_ttl_seconds: env_parse("SESSION_TTL_SECONDS", 25)?,
            cancel_phrases,
            forward_strip_trigger: env_bool("FORWARD_STRIP_TRIGGER", true)?,
            http_timeout_s: env_parse("HTTP_TIMEOUT_S", 10)?,
            initial_listen_mode,
            audio: AudioConfig {
                device_index,
                sample_rate: env_parse("AUDIO_SAMPLE_RATE", 16_000)?,
                channels: env_parse("AUDIO_CHANNELS", 1)?,
                silence_duration_s: env_parse("AUDIO_SILENCE_DURATION", 1.0)?,
                min_duration_s: env_parse("AUDIO_MIN_DURATION", 0.5)?,
                max_duration_s: env_parse("AUDIO_MAX_DURATION", 30.0)?,
                energy_threshold: env_parse("AUDIO_ENERGY_THRESHOLD", 0.01)?,
                use_ml_vad: env_bool("AUDIO_USE_ML_VAD", true)?,
            },
            whisper: WhisperConfig {
                model: env_var("WHISPER_MODEL").unwrap_or_else(|| "whisper-1".to_string()),
                device: env_var("WHISPER_DEVICE").unwrap_or_else(|| "cpu".to_string()),
                compute_type: env_var("WHISPER_COMPUTE_TYPE")
                    .unwrap_or_else(|| "int8".to_string()),
                language: env_var("WHISPER_LANGUAGE").unwrap_or_else(|| "auto".to_string()),
                api_url: env_var("WHISPER_API_URL").unwrap_or_else(|| {
                    "https://api.openai.com/v1/audio/transcriptions".to_string()
                }),
                api_key: env_var("WHISPER_API_KEY"),
            },
            discovery: DiscoveryConfig {
                enabled: env_bool("DISCOVERY_ENABLED", false)?,
                instance_name,
                zone: env_var("DISCOVERY_ZONE").unwrap_or_default(),
                subzone: env_var("DISCOVERY_SUBZONE").unwrap_or_default(),
            },
        })
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: 16_000,
            channels: 1,
            silence_duration_s: 1.0,
            min_duration_s: 0.5,
            max_duration_s: 30.0,
            energy_threshold: 0.01,
            use_ml_vad: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_defaults() {
        let audio = AudioConfig::default();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.channels, 1);
        assert!((audio.silence_duration_s - 1.0).abs() < f32::EPSILON);
        assert!(audio.use_ml_vad);
    }
}
