//! Microphone capture with VAD endpointing
//!
//! The device is opened for the duration of one `record_until_silence` call
//! and released when it returns, on every path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use super::ring::RingBuffer;
use super::vad::{energy_rms, EndpointDecision, Endpointer, EndpointParams, SileroDetector};
use super::{AudioDevice, SAMPLE_RATE};
use crate::{Error, Result};

/// Chunk length when the Silero gate is active (needs context to judge)
const ML_CHUNK_SECONDS: f32 = 0.5;

/// Chunk length for energy-only endpointing
const ENERGY_CHUNK_SECONDS: f32 = 0.1;

/// Give up if no speech is heard within this leading window
const STARTUP_WINDOW_SECONDS: f32 = 3.0;

/// Wait on the audio callback this long before declaring the stream dead
const CHUNK_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// An opaque source of endpointed recordings
///
/// The worker only depends on this trait; production uses `CpalCapture`,
/// tests substitute canned audio.
pub trait CaptureSource: Send + Sync {
    /// Record one speech segment, honoring the stop flag
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or the stream fails
    fn record(
        &self,
        request: &RecordRequest,
        ring: Option<&RingBuffer>,
        stop: &AtomicBool,
    ) -> Result<Option<Vec<f32>>>;
}

/// Capture source backed by the system's audio host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalCapture;

impl CaptureSource for CpalCapture {
    fn record(
        &self,
        request: &RecordRequest,
        ring: Option<&RingBuffer>,
        stop: &AtomicBool,
    ) -> Result<Option<Vec<f32>>> {
        record_until_silence(request, ring, stop)
    }
}

/// Parameters for one endpointed recording
#[derive(Debug, Clone)]
pub struct RecordRequest {
    /// Input device index (None = system default)
    pub device_index: Option<usize>,
    /// Seconds of contiguous non-speech that end the segment
    pub silence_duration_s: f32,
    /// Minimum segment length in seconds
    pub min_duration_s: f32,
    /// Hard cap on segment length in seconds
    pub max_duration_s: f32,
    /// RMS threshold below which a chunk is silent
    pub energy_threshold: f32,
    /// Gate energetic chunks through the Silero detector
    pub use_ml_vad: bool,
    /// Pre-roll samples to prepend to the returned buffer
    pub preroll: Option<Vec<f32>>,
}

/// Enumerate audio input devices
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?;

    let mut out = Vec::new();
    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| format!("device-{index}"));
        let config = device.default_input_config().ok();
        out.push(AudioDevice {
            index,
            is_default: default_name.as_deref() == Some(name.as_str()),
            channels: config.as_ref().map_or(1, cpal::SupportedStreamConfig::channels),
            sample_rate: config
                .as_ref()
                .map_or(SAMPLE_RATE, |c| c.sample_rate().0),
            name,
        });
    }

    Ok(out)
}

/// The system default input device, if any
#[must_use]
pub fn default_device() -> Option<AudioDevice> {
    list_devices()
        .ok()?
        .into_iter()
        .find(|device| device.is_default)
}

/// Open the input device at `index`, or the system default
fn open_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    match index {
        Some(index) => host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .nth(index)
            .ok_or_else(|| Error::Audio(format!("no input device at index {index}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string())),
    }
}

/// Record from the device until the speaker stops
///
/// Blocks the calling thread; run it under `spawn_blocking`. Returns `None`
/// when no speech is heard within the startup window. The `stop` flag is
/// honored at every chunk boundary. Live chunks are mirrored into `ring`
/// when given, so pre-roll stays current across calls.
///
/// # Errors
///
/// Returns error if the device cannot be opened or the stream fails
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn record_until_silence(
    request: &RecordRequest,
    ring: Option<&RingBuffer>,
    stop: &AtomicBool,
) -> Result<Option<Vec<f32>>> {
    let device = open_device(request.device_index)?;
    let device_name = device.name().unwrap_or_default();

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no mono 16kHz input config found".to_string()))?;
    let config = supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

    let chunk_seconds = if request.use_ml_vad {
        ML_CHUNK_SECONDS
    } else {
        ENERGY_CHUNK_SECONDS
    };
    let chunk_samples = (chunk_seconds * SAMPLE_RATE as f32) as usize;

    let mut detector = if request.use_ml_vad {
        match SileroDetector::new(SAMPLE_RATE) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "silero unavailable, falling back to energy VAD");
                None
            }
        }
    } else {
        None
    };

    let (tx, rx) = mpsc::channel::<Vec<f32>>();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.to_vec());
            },
            |err| {
                tracing::error!(error = %err, "audio stream error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;
    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = %device_name,
        ml_vad = detector.is_some(),
        max_s = request.max_duration_s,
        "recording until silence"
    );

    let mut endpointer = Endpointer::new(EndpointParams {
        sample_rate: SAMPLE_RATE,
        silence_duration_s: request.silence_duration_s,
        min_duration_s: request.min_duration_s,
        max_duration_s: request.max_duration_s,
        startup_window_s: STARTUP_WINDOW_SECONDS,
    });

    let mut recording: Vec<f32> = Vec::new();
    let mut pending: Vec<f32> = Vec::new();
    let mut outcome = EndpointDecision::Continue;

    'capture: while outcome == EndpointDecision::Continue {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("capture aborted by stop signal");
            return Ok(None);
        }

        let data = match rx.recv_timeout(CHUNK_RECV_TIMEOUT) {
            Ok(data) => data,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(Error::Audio("audio stream stalled".to_string()));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(Error::Audio("audio stream closed".to_string()));
            }
        };
        pending.extend_from_slice(&data);

        while pending.len() >= chunk_samples {
            let chunk: Vec<f32> = pending.drain(..chunk_samples).collect();

            if let Some(ring) = ring {
                ring.push(&chunk);
            }
            recording.extend_from_slice(&chunk);

            let energetic = energy_rms(&chunk) >= request.energy_threshold;
            let is_speech = match (&mut detector, energetic) {
                (_, false) => false,
                (Some(detector), true) => detector.is_speech(&chunk),
                (None, true) => true,
            };

            outcome = endpointer.push_chunk(chunk.len(), is_speech);
            if outcome != EndpointDecision::Continue {
                break 'capture;
            }
        }
    }

    // Stream (and the device) released here, on every path
    drop(stream);

    match outcome {
        EndpointDecision::NoSpeechTimeout => {
            tracing::debug!("no speech within startup window");
            Ok(None)
        }
        EndpointDecision::EndOfSegment | EndpointDecision::MaxDuration => {
            let mut out = match &request.preroll {
                Some(preroll) if !preroll.is_empty() => {
                    tracing::debug!(
                        preroll_samples = preroll.len(),
                        "prepending pre-roll audio"
                    );
                    let mut joined = preroll.clone();
                    joined.extend_from_slice(&recording);
                    joined
                }
                _ => recording,
            };
            out.shrink_to_fit();

            tracing::debug!(
                samples = out.len(),
                seconds = out.len() as f32 / SAMPLE_RATE as f32,
                "segment captured"
            );
            Ok(Some(out))
        }
        EndpointDecision::Continue => unreachable!("loop exits only on a decision"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_sizes() {
        assert_eq!((ML_CHUNK_SECONDS * 16_000.0) as usize, 8_000);
        assert_eq!((ENERGY_CHUNK_SECONDS * 16_000.0) as usize, 1_600);
    }

    #[test]
    fn test_open_device_bad_index() {
        // Index far past any real device; also tolerates hosts with no
        // audio at all (CI), where enumeration itself errors.
        let result = open_device(Some(usize::MAX));
        assert!(result.is_err());
    }
}
