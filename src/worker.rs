//! ASR worker: the capture → transcribe → route loop
//!
//! A single long-lived task that reads the listen mode from the state cache
//! each iteration and drives the audio pipeline accordingly. Recoverable
//! errors back off and retry; nothing here ends the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{CaptureSource, RecordRequest, RingBuffer, SAMPLE_RATE};
use crate::config::AudioConfig;
use crate::router::{Router, TextEvent};
use crate::state::{ListenMode, StateManager};
use crate::transcribe::Transcriber;
use crate::Result;

/// Idle poll interval while inactive
const INACTIVE_SLEEP: Duration = Duration::from_millis(500);

/// Trigger-mode segments are cut short; wake phrases come early
const TRIGGER_MAX_DURATION_S: f32 = 10.0;

/// Error backoff ladder, capped at the last step
const BACKOFF_STEPS: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Consecutive capture failures before falling back to the default device
const DEVICE_FALLBACK_THRESHOLD: u32 = 3;

/// Outcome label for the active-mode auto-reset audit entry
enum ActiveOutcome {
    Completed,
    Empty,
    NoAudio,
}

impl ActiveOutcome {
    fn reason(&self) -> &'static str {
        match self {
            Self::Completed => "active_mode_completed",
            Self::Empty => "active_mode_empty",
            Self::NoAudio => "active_mode_no_audio",
        }
    }
}

/// The mode-aware ASR worker
pub struct AsrWorker {
    state: Arc<StateManager>,
    router: Arc<Router>,
    capture: Arc<dyn CaptureSource>,
    transcriber: Arc<dyn Transcriber>,
    audio: AudioConfig,
    source_id: String,
    room: Option<String>,
    stop: Arc<AtomicBool>,

    /// Device index last observed in the cache, to log changes
    last_device_index: Option<usize>,
    /// Capture failures since the last success
    consecutive_failures: u32,
    /// Set after repeated failures; cleared when the configured index changes
    use_default_device: bool,
    /// Error backoff position
    backoff_step: usize,
    /// Pre-roll ring and the seconds it was sized for
    preroll: Option<(Arc<RingBuffer>, f32)>,
}

impl AsrWorker {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateManager>,
        router: Arc<Router>,
        capture: Arc<dyn CaptureSource>,
        transcriber: Arc<dyn Transcriber>,
        audio: AudioConfig,
        source_id: String,
        room: Option<String>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            router,
            capture,
            transcriber,
            audio,
            source_id,
            room,
            stop,
            last_device_index: None,
            consecutive_failures: 0,
            use_default_device: false,
            backoff_step: 0,
            preroll: None,
        }
    }

    /// Run until the stop flag is raised
    pub async fn run(mut self) {
        tracing::info!(source_id = %self.source_id, "asr worker started");

        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.iteration().await {
                let backoff = BACKOFF_STEPS[self.backoff_step.min(BACKOFF_STEPS.len() - 1)];
                self.backoff_step += 1;
                tracing::error!(
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "worker iteration failed"
                );
                tokio::time::sleep(backoff).await;
            } else {
                self.backoff_step = 0;
            }
        }

        tracing::info!("asr worker stopped");
    }

    async fn iteration(&mut self) -> Result<()> {
        let mode = self.state.listen_mode()?;
        self.observe_device_change()?;

        match mode {
            ListenMode::Inactive => {
                // The device stays closed; drop stale pre-roll audio too
                if let Some((ring, _)) = &self.preroll {
                    ring.clear();
                }
                tokio::time::sleep(INACTIVE_SLEEP).await;
                Ok(())
            }
            ListenMode::Trigger => self.trigger_cycle().await,
            ListenMode::Active => self.active_cycle().await,
        }
    }

    /// One wake-phrase-gated capture cycle
    async fn trigger_cycle(&mut self) -> Result<()> {
        let ring = self.preroll_ring()?;
        let preroll = ring
            .as_ref()
            .map(|r| r.snapshot())
            .filter(|s| !s.is_empty());

        let Some(pcm) = self
            .record(TRIGGER_MAX_DURATION_S, preroll, ring.clone())
            .await?
        else {
            return Ok(());
        };
        if let Some(ring) = &ring {
            // Captured audio is in flight; keeping it would replay it
            ring.clear();
        }

        let transcription = self
            .transcriber
            .transcribe(&pcm, SAMPLE_RATE, None)
            .await?;
        if transcription.text.trim().is_empty() {
            tracing::debug!("empty transcript discarded");
            return Ok(());
        }

        let event = self.build_event(&transcription.text, transcription.confidence);
        let decision = self.router.route(&event).await?;
        tracing::info!(
            text = %event.text,
            mode = ?decision.mode,
            routed_to = decision.routed_to.as_deref().unwrap_or("-"),
            forwarded = decision.forwarded,
            reason = %decision.reason,
            "trigger cycle routed"
        );
        Ok(())
    }

    /// One route-everything capture cycle; always resets to trigger after
    async fn active_cycle(&mut self) -> Result<()> {
        let outcome = match self.record(self.audio.max_duration_s, None, None).await {
            Ok(Some(pcm)) => {
                let transcription = self
                    .transcriber
                    .transcribe(&pcm, SAMPLE_RATE, None)
                    .await?;
                if transcription.text.trim().is_empty() {
                    ActiveOutcome::Empty
                } else {
                    let event =
                        self.build_event(&transcription.text, transcription.confidence);
                    let decision = self.router.route_active(&event).await?;
                    tracing::info!(
                        text = %event.text,
                        routed_to = decision.routed_to.as_deref().unwrap_or("-"),
                        forwarded = decision.forwarded,
                        reason = %decision.reason,
                        "active cycle routed"
                    );
                    ActiveOutcome::Completed
                }
            }
            Ok(None) => ActiveOutcome::NoAudio,
            Err(e) => {
                // Reset first so a broken device cannot pin active mode
                self.state.set_listen_mode(
                    ListenMode::Trigger,
                    "asr_worker",
                    Some("active_mode_error"),
                )?;
                return Err(e);
            }
        };

        self.state
            .set_listen_mode(ListenMode::Trigger, "asr_worker", Some(outcome.reason()))?;
        Ok(())
    }

    /// Run one blocking capture on the blocking pool
    async fn record(
        &mut self,
        max_duration_s: f32,
        preroll: Option<Vec<f32>>,
        ring: Option<Arc<RingBuffer>>,
    ) -> Result<Option<Vec<f32>>> {
        let request = RecordRequest {
            device_index: self.effective_device_index(),
            silence_duration_s: self.audio.silence_duration_s,
            min_duration_s: self.audio.min_duration_s,
            max_duration_s,
            energy_threshold: self.audio.energy_threshold,
            use_ml_vad: self.audio.use_ml_vad,
            preroll,
        };
        let capture = Arc::clone(&self.capture);
        let stop = Arc::clone(&self.stop);

        let result = tokio::task::spawn_blocking(move || {
            capture.record(&request, ring.as_deref(), &stop)
        })
        .await
        .map_err(|e| crate::Error::Audio(format!("capture task panicked: {e}")))?;

        match result {
            Ok(pcm) => {
                self.consecutive_failures = 0;
                Ok(pcm)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= DEVICE_FALLBACK_THRESHOLD
                    && !self.use_default_device
                {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        "capture keeps failing, falling back to default device"
                    );
                    self.use_default_device = true;
                }
                Err(e)
            }
        }
    }

    /// Log device-index changes and adopt them for the next capture
    fn observe_device_change(&mut self) -> Result<()> {
        let configured = self.state.audio_device_index()?;
        if configured != self.last_device_index {
            tracing::info!(
                old = ?self.last_device_index,
                new = ?configured,
                "audio device changed"
            );
            self.last_device_index = configured;
            self.consecutive_failures = 0;
            self.use_default_device = false;
        }
        Ok(())
    }

    fn effective_device_index(&self) -> Option<usize> {
        if self.use_default_device {
            None
        } else {
            self.last_device_index.or(self.audio.device_index)
        }
    }

    /// Current pre-roll ring, created or resized to match the settings
    fn preroll_ring(&mut self) -> Result<Option<Arc<RingBuffer>>> {
        if !self.state.preroll_enabled()? {
            self.preroll = None;
            return Ok(None);
        }

        let seconds = self.state.preroll_seconds()?;
        let needs_new = match &self.preroll {
            Some((_, current)) => (current - seconds).abs() > f32::EPSILON,
            None => true,
        };
        if needs_new {
            tracing::debug!(seconds, "pre-roll buffer (re)created");
            self.preroll = Some((Arc::new(RingBuffer::new(seconds, SAMPLE_RATE)), seconds));
        }

        Ok(self.preroll.as_ref().map(|(ring, _)| Arc::clone(ring)))
    }

    fn build_event(&self, text: &str, confidence: f32) -> TextEvent {
        TextEvent {
            source_id: self.source_id.clone(),
            room: self.room.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
            text: text.to_string(),
            confidence: Some(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, SettingsStore};
    use crate::forwarder::TargetForwarder;
    use crate::registry::Registry;
    use crate::router::RouterConfig;
    use crate::state;
    use crate::transcribe::StubTranscriber;

    /// Capture source returning a fixed buffer (or nothing)
    struct CannedCapture {
        pcm: Option<Vec<f32>>,
    }

    impl CaptureSource for CannedCapture {
        fn record(
            &self,
            _request: &RecordRequest,
            _ring: Option<&RingBuffer>,
            _stop: &AtomicBool,
        ) -> Result<Option<Vec<f32>>> {
            Ok(self.pcm.clone())
        }
    }

    /// Capture source that always fails
    struct BrokenCapture;

    impl CaptureSource for BrokenCapture {
        fn record(
            &self,
            _request: &RecordRequest,
            _ring: Option<&RingBuffer>,
            _stop: &AtomicBool,
        ) -> Result<Option<Vec<f32>>> {
            Err(crate::Error::Audio("device busy".to_string()))
        }
    }

    fn setup_worker(
        capture: Arc<dyn CaptureSource>,
        transcript: &str,
    ) -> (AsrWorker, Arc<StateManager>, Arc<AtomicBool>) {
        let pool = db::init_memory().unwrap();
        let store = Arc::new(SettingsStore::new(pool.clone()));
        let state = Arc::new(StateManager::new(store));
        let registry = Arc::new(Registry::new(pool).unwrap());
        registry
            .upsert("astraea", "http://127.0.0.1:9/off", &["hey astraea".to_string()])
            .unwrap();
        let router = Arc::new(Router::new(
            registry,
            TargetForwarder::new(1).unwrap(),
            RouterConfig {
                cancel_phrases: vec!["cancel".to_string()],
                session_ttl_seconds: 25,
                strip_trigger: true,
            },
        ));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = AsrWorker::new(
            Arc::clone(&state),
            router,
            capture,
            Arc::new(StubTranscriber::with_text(transcript)),
            AudioConfig::default(),
            "m1".to_string(),
            None,
            Arc::clone(&stop),
        );
        (worker, state, stop)
    }

    fn canned(pcm: Option<Vec<f32>>) -> Arc<dyn CaptureSource> {
        Arc::new(CannedCapture { pcm })
    }

    #[test]
    fn test_active_outcome_reasons() {
        assert_eq!(ActiveOutcome::Completed.reason(), "active_mode_completed");
        assert_eq!(ActiveOutcome::Empty.reason(), "active_mode_empty");
        assert_eq!(ActiveOutcome::NoAudio.reason(), "active_mode_no_audio");
    }

    #[tokio::test]
    async fn test_inactive_iteration_touches_no_device() {
        let (mut worker, state, _stop) = setup_worker(Arc::new(BrokenCapture), "hello");
        state
            .set_listen_mode(ListenMode::Inactive, "test", None)
            .unwrap();

        // BrokenCapture would error if the worker tried to record
        worker.iteration().await.unwrap();
        assert_eq!(state.listen_mode().unwrap(), ListenMode::Inactive);
    }

    #[tokio::test]
    async fn test_stop_flag_ends_run() {
        let (worker, state, stop) = setup_worker(canned(None), "hello");
        state
            .set_listen_mode(ListenMode::Inactive, "test", None)
            .unwrap();
        stop.store(true, Ordering::Relaxed);

        // Returns immediately instead of looping forever
        worker.run().await;
    }

    #[tokio::test]
    async fn test_active_mode_auto_resets_after_routing() {
        let (mut worker, state, _stop) =
            setup_worker(canned(Some(vec![0.1; 16_000])), "hey astraea hello");
        state
            .set_listen_mode(ListenMode::Active, "api:test", Some("button"))
            .unwrap();

        worker.iteration().await.unwrap();

        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
        let latest = &state.store().history(Some(state::LISTEN_MODE), 1).unwrap()[0];
        assert_eq!(latest.source.as_deref(), Some("asr_worker"));
        assert_eq!(latest.reason.as_deref(), Some("active_mode_completed"));
        assert_eq!(latest.old_value.as_deref(), Some("active"));
        assert_eq!(latest.new_value, "trigger");
    }

    #[tokio::test]
    async fn test_active_mode_auto_resets_on_no_audio() {
        let (mut worker, state, _stop) = setup_worker(canned(None), "hello");
        state
            .set_listen_mode(ListenMode::Active, "test", None)
            .unwrap();

        worker.iteration().await.unwrap();

        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
        let latest = &state.store().history(Some(state::LISTEN_MODE), 1).unwrap()[0];
        assert_eq!(latest.reason.as_deref(), Some("active_mode_no_audio"));
    }

    #[tokio::test]
    async fn test_active_mode_auto_resets_on_empty_transcript() {
        let (mut worker, state, _stop) = setup_worker(canned(Some(vec![0.1; 1600])), "   ");
        state
            .set_listen_mode(ListenMode::Active, "test", None)
            .unwrap();

        worker.iteration().await.unwrap();

        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
        let latest = &state.store().history(Some(state::LISTEN_MODE), 1).unwrap()[0];
        assert_eq!(latest.reason.as_deref(), Some("active_mode_empty"));
    }

    #[tokio::test]
    async fn test_active_mode_resets_even_on_capture_error() {
        let (mut worker, state, _stop) = setup_worker(Arc::new(BrokenCapture), "hello");
        state
            .set_listen_mode(ListenMode::Active, "test", None)
            .unwrap();

        assert!(worker.iteration().await.is_err());
        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
    }

    #[tokio::test]
    async fn test_trigger_cycle_discards_silent_capture() {
        let (mut worker, state, _stop) = setup_worker(canned(None), "hello");
        // Default mode is trigger; a None capture is simply skipped
        worker.iteration().await.unwrap();
        assert_eq!(state.listen_mode().unwrap(), ListenMode::Trigger);
    }

    #[tokio::test]
    async fn test_device_fallback_after_repeated_failures() {
        let (mut worker, _state, _stop) = setup_worker(Arc::new(BrokenCapture), "hello");

        for _ in 0..DEVICE_FALLBACK_THRESHOLD {
            assert!(worker.iteration().await.is_err());
        }
        assert!(worker.use_default_device);
        assert_eq!(worker.effective_device_index(), None);
    }

    #[tokio::test]
    async fn test_device_change_observed() {
        let (mut worker, state, _stop) = setup_worker(canned(None), "hello");

        state.set_audio_device_index(2, "test", None).unwrap();
        worker.observe_device_change().unwrap();
        assert_eq!(worker.effective_device_index(), Some(2));

        state.set_audio_device_index(5, "test", None).unwrap();
        worker.observe_device_change().unwrap();
        assert_eq!(worker.effective_device_index(), Some(5));
    }

    #[tokio::test]
    async fn test_device_fallback_cleared_on_config_change() {
        let (mut worker, state, _stop) = setup_worker(canned(None), "hello");
        worker.use_default_device = true;

        state.set_audio_device_index(1, "test", None).unwrap();
        worker.observe_device_change().unwrap();

        assert!(!worker.use_default_device);
        assert_eq!(worker.effective_device_index(), Some(1));
    }

    #[tokio::test]
    async fn test_preroll_ring_follows_settings() {
        let (mut worker, state, _stop) = setup_worker(canned(None), "hello");

        assert!(worker.preroll_ring().unwrap().is_none());

        state
            .set_config(state::ENABLE_PREROLL_BUFFER, "true", "test", None)
            .unwrap();
        let ring = worker.preroll_ring().unwrap().unwrap();
        assert_eq!(ring.capacity(), 32_000); // 2.0s default at 16kHz

        state
            .set_config(state::PREROLL_BUFFER_SECONDS, "4.0", "test", None)
            .unwrap();
        let ring = worker.preroll_ring().unwrap().unwrap();
        assert_eq!(ring.capacity(), 64_000);
    }
}
