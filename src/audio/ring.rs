//! Rolling pre-roll buffer
//!
//! Keeps the most recent N seconds of samples so speech uttered just before
//! a trigger event is not lost. Overflow evicts the oldest samples.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Fixed-capacity rolling buffer of PCM samples
pub struct RingBuffer {
    inner: Mutex<VecDeque<f32>>,
    capacity: usize,
    sample_rate: u32,
}

impl RingBuffer {
    /// Create a buffer holding `duration_seconds` of audio at `sample_rate`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(duration_seconds: f32, sample_rate: u32) -> Self {
        let capacity = (duration_seconds.max(0.0) * sample_rate as f32) as usize;
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sample_rate,
        }
    }

    /// Append samples, evicting the oldest past capacity
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };

        if samples.len() >= self.capacity {
            // The new chunk alone fills the buffer
            buf.clear();
            buf.extend(&samples[samples.len() - self.capacity..]);
            return;
        }

        let overflow = (buf.len() + samples.len()).saturating_sub(self.capacity);
        buf.drain(..overflow);
        buf.extend(samples);
    }

    /// Copy of the current contents, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.inner
            .lock()
            .map(|buf| buf.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop all buffered samples
    pub fn clear(&self) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.clear();
        }
    }

    /// Number of buffered samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity in samples
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Seconds of audio currently buffered
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_seconds(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }
}
