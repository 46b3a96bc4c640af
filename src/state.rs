//! Typed state accessors over the settings store
//!
//! Wraps the raw key/value store with the `ListenMode` enum, validated
//! runtime-config accessors, and a broadcast channel for change events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::SettingsStore;
use crate::{Error, Result};

/// Setting name for the current listen mode
pub const LISTEN_MODE: &str = "listen_mode";

/// Setting name for the selected audio input device
pub const AUDIO_DEVICE_INDEX: &str = "audio_device_index";

/// Setting name for the pre-roll buffer toggle
pub const ENABLE_PREROLL_BUFFER: &str = "enable_preroll_buffer";

/// Setting name for the pre-roll buffer length
pub const PREROLL_BUFFER_SECONDS: &str = "preroll_buffer_seconds";

/// Allowed range for `preroll_buffer_seconds`
const PREROLL_SECONDS_RANGE: std::ops::RangeInclusive<f32> = 0.5..=10.0;

/// The worker's listening mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    /// No capture at all; the audio device is released
    Inactive,
    /// Capture gated on wake phrases
    Trigger,
    /// Route everything once, then auto-reset to trigger
    Active,
}

impl std::str::FromStr for ListenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "inactive" => Ok(Self::Inactive),
            "trigger" => Ok(Self::Trigger),
            "active" => Ok(Self::Active),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ListenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Trigger => write!(f, "trigger"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Notification published after each successful settings write
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub name: String,
    pub value: String,
}

/// Typed facade over the settings store
pub struct StateManager {
    store: Arc<SettingsStore>,
    events: broadcast::Sender<StateEvent>,
}

impl StateManager {
    #[must_use]
    pub fn new(store: Arc<SettingsStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { store, events }
    }

    /// Current listen mode; unknown or missing values fall back to trigger
    ///
    /// Cache-backed: no disk I/O after warmup.
    ///
    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn listen_mode(&self) -> Result<ListenMode> {
        Ok(self
            .store
            .get_value(LISTEN_MODE)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(ListenMode::Trigger))
    }

    /// Write the listen mode and log the change
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn set_listen_mode(
        &self,
        mode: ListenMode,
        source: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        self.set_raw(LISTEN_MODE, &mode.to_string(), source, reason)
    }

    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn is_inactive(&self) -> Result<bool> {
        Ok(self.listen_mode()? == ListenMode::Inactive)
    }

    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn is_trigger(&self) -> Result<bool> {
        Ok(self.listen_mode()? == ListenMode::Trigger)
    }

    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.listen_mode()? == ListenMode::Active)
    }

    /// Selected audio device index, if one was ever chosen
    ///
    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn audio_device_index(&self) -> Result<Option<usize>> {
        Ok(self
            .store
            .get_value(AUDIO_DEVICE_INDEX)?
            .and_then(|v| v.parse().ok()))
    }

    /// Select an audio device by index
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn set_audio_device_index(
        &self,
        index: usize,
        source: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        self.set_raw(AUDIO_DEVICE_INDEX, &index.to_string(), source, reason)
    }

    /// Whether the pre-roll buffer is enabled
    ///
    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn preroll_enabled(&self) -> Result<bool> {
        Ok(self
            .store
            .get_value(ENABLE_PREROLL_BUFFER)?
            .is_some_and(|v| v == "true"))
    }

    /// Pre-roll buffer length in seconds
    ///
    /// # Errors
    ///
    /// Returns error if the cache warmup read fails
    pub fn preroll_seconds(&self) -> Result<f32> {
        Ok(self
            .store
            .get_value(PREROLL_BUFFER_SECONDS)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(2.0))
    }

    /// Write a runtime-config setting with per-key validation
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown key and `Error::Config` for
    /// a value that fails the key's type or range check.
    pub fn set_config(
        &self,
        key: &str,
        value: &str,
        source: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        match key {
            ENABLE_PREROLL_BUFFER => {
                if value != "true" && value != "false" {
                    return Err(Error::Config(format!(
                        "{ENABLE_PREROLL_BUFFER} must be 'true' or 'false', got '{value}'"
                    )));
                }
            }
            PREROLL_BUFFER_SECONDS => {
                let seconds: f32 = value.parse().map_err(|_| {
                    Error::Config(format!(
                        "{PREROLL_BUFFER_SECONDS} must be a number, got '{value}'"
                    ))
                })?;
                if !PREROLL_SECONDS_RANGE.contains(&seconds) {
                    return Err(Error::Config(format!(
                        "{PREROLL_BUFFER_SECONDS} must be within {PREROLL_SECONDS_RANGE:?}, got {seconds}"
                    )));
                }
            }
            other => return Err(Error::NotFound(format!("config key '{other}'"))),
        }

        self.set_raw(key, value, source, reason)
    }

    /// The runtime-configurable keys exposed via the config endpoints
    #[must_use]
    pub fn config_keys() -> &'static [&'static str] {
        &[ENABLE_PREROLL_BUFFER, PREROLL_BUFFER_SECONDS]
    }

    /// Subscribe to settings-change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// The underlying store, for snapshot and history reads
    #[must_use]
    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    fn set_raw(&self, name: &str, value: &str, source: &str, reason: Option<&str>) -> Result<()> {
        self.store.set(name, value, source, reason)?;
        // No subscribers is fine; the worker usually polls the cache
        let _ = self.events.send(StateEvent {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_state() -> StateManager {
        StateManager::new(Arc::new(SettingsStore::new(db::init_memory().unwrap())))
    }

    #[test]
    fn test_mode_parse_round_trip() {
        for mode in [ListenMode::Inactive, ListenMode::Trigger, ListenMode::Active] {
            assert_eq!(mode.to_string().parse::<ListenMode>().unwrap(), mode);
        }
        assert!(matches!(
            "loud".parse::<ListenMode>(),
            Err(Error::InvalidMode(_))
        ));
    }

    #[test]
    fn test_defaults_to_trigger() {
        let state = setup_state();
        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
        assert!(state.is_trigger().unwrap());
    }

    #[test]
    fn test_set_listen_mode_linearizable() {
        let state = setup_state();
        for mode in [ListenMode::Inactive, ListenMode::Active, ListenMode::Trigger] {
            state.set_listen_mode(mode, "test", None).unwrap();
            assert_eq!(state.listen_mode().unwrap(), mode);
        }
    }

    #[test]
    fn test_mode_transitions_all_pairs() {
        let state = setup_state();

        state
            .set_listen_mode(ListenMode::Inactive, "test", Some("privacy mode"))
            .unwrap();
        assert!(state.is_inactive().unwrap());

        state
            .set_listen_mode(ListenMode::Active, "test", Some("button pressed"))
            .unwrap();
        assert!(state.is_active().unwrap());

        state
            .set_listen_mode(ListenMode::Trigger, "test", Some("auto reset"))
            .unwrap();
        assert!(state.is_trigger().unwrap());
    }

    #[test]
    fn test_audio_device_index() {
        let state = setup_state();
        assert_eq!(state.audio_device_index().unwrap(), None);

        state.set_audio_device_index(3, "test", None).unwrap();
        assert_eq!(state.audio_device_index().unwrap(), Some(3));
    }

    #[test]
    fn test_config_validation() {
        let state = setup_state();

        state
            .set_config(ENABLE_PREROLL_BUFFER, "true", "test", None)
            .unwrap();
        assert!(state.preroll_enabled().unwrap());

        assert!(state
            .set_config(ENABLE_PREROLL_BUFFER, "yes", "test", None)
            .is_err());
        assert!(state
            .set_config(PREROLL_BUFFER_SECONDS, "0.1", "test", None)
            .is_err());
        assert!(state
            .set_config(PREROLL_BUFFER_SECONDS, "abc", "test", None)
            .is_err());
        assert!(matches!(
            state.set_config("nonexistent", "1", "test", None),
            Err(Error::NotFound(_))
        ));

        state
            .set_config(PREROLL_BUFFER_SECONDS, "3.5", "test", None)
            .unwrap();
        assert!((state.preroll_seconds().unwrap() - 3.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_change_events_published() {
        let state = setup_state();
        let mut rx = state.subscribe();

        state
            .set_listen_mode(ListenMode::Active, "test", None)
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, LISTEN_MODE);
        assert_eq!(event.value, "active");
    }
}
