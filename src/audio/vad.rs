//! Voice activity detection and endpointing
//!
//! Two stages: a cheap RMS energy gate on every chunk, and a Silero speech
//! detector applied to chunks that pass the gate. The `Endpointer` turns
//! per-chunk speech decisions into segment boundaries.

use voice_activity_detector::VoiceActivityDetector;

use crate::{Error, Result};

/// Silero frame size for 16kHz input
const SILERO_CHUNK: usize = 512;

/// Speech probability above which a frame counts as speech
const SILERO_THRESHOLD: f32 = 0.5;

/// RMS energy of a sample buffer
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn energy_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// ML speech detector backed by the Silero VAD model
pub struct SileroDetector {
    detector: VoiceActivityDetector,
}

impl SileroDetector {
    /// Load the detector for the given sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be constructed
    pub fn new(sample_rate: u32) -> Result<Self> {
        let detector = VoiceActivityDetector::builder()
            .sample_rate(i64::from(sample_rate))
            .chunk_size(SILERO_CHUNK)
            .build()
            .map_err(|e| Error::Vad(e.to_string()))?;

        Ok(Self { detector })
    }

    /// Whether any frame of the chunk carries speech
    pub fn is_speech(&mut self, chunk: &[f32]) -> bool {
        chunk
            .chunks(SILERO_CHUNK)
            .any(|frame| self.detector.predict(frame.iter().copied()) >= SILERO_THRESHOLD)
    }
}

/// Endpointing parameters for one recording
#[derive(Debug, Clone)]
pub struct EndpointParams {
    pub sample_rate: u32,
    /// Seconds of contiguous non-speech that end the segment
    pub silence_duration_s: f32,
    /// Segments shorter than this keep recording through silence
    pub min_duration_s: f32,
    /// Hard cap on segment length
    pub max_duration_s: f32,
    /// Give up if no speech is heard within this leading window
    pub startup_window_s: f32,
}

/// Outcome of feeding one chunk to the endpointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    /// Keep recording
    Continue,
    /// Silence after speech; the segment is complete
    EndOfSegment,
    /// No speech within the startup window; discard the recording
    NoSpeechTimeout,
    /// Safety cap reached
    MaxDuration,
}

/// Tracks per-segment counters and applies the endpointing rule
pub struct Endpointer {
    params: EndpointParams,
    total_samples: usize,
    silence_samples: usize,
    speech_seen: bool,
}

impl Endpointer {
    #[must_use]
    pub fn new(params: EndpointParams) -> Self {
        Self {
            params,
            total_samples: 0,
            silence_samples: 0,
            speech_seen: false,
        }
    }

    /// Whether any speech has been observed so far
    #[must_use]
    pub fn speech_seen(&self) -> bool {
        self.speech_seen
    }

    /// Account for one chunk and decide whether the segment is over
    pub fn push_chunk(&mut self, chunk_len: usize, is_speech: bool) -> EndpointDecision {
        self.total_samples += chunk_len;

        if is_speech {
            self.speech_seen = true;
            self.silence_samples = 0;
        } else {
            self.silence_samples += chunk_len;
        }

        let elapsed = self.seconds(self.total_samples);
        let silence = self.seconds(self.silence_samples);

        if !self.speech_seen && elapsed >= self.params.startup_window_s {
            return EndpointDecision::NoSpeechTimeout;
        }

        if self.speech_seen
            && elapsed >= self.params.min_duration_s
            && silence >= self.params.silence_duration_s
        {
            return EndpointDecision::EndOfSegment;
        }

        if elapsed >= self.params.max_duration_s {
            return EndpointDecision::MaxDuration;
        }

        EndpointDecision::Continue
    }

    #[allow(clippy::cast_precision_loss)]
    fn seconds(&self, samples: usize) -> f32 {
        samples as f32 / self.params.sample_rate as f32
    }
}
