//! Audio frames and utterances

use std::sync::Arc;
use std::time::Duration;

use crate::Result;

/// A fixed-length block of mono samples from the capture stream
///
/// Frames are immutable; clones share the sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    seq: u64,
    sample_rate: u32,
    offset: Duration,
    samples: Arc<[f32]>,
}

impl AudioFrame {
    /// Create a frame
    ///
    /// `offset` is the stream time of the first sample.
    #[must_use]
    pub fn new(seq: u64, sample_rate: u32, offset: Duration, samples: Vec<f32>) -> Self {
        Self {
            seq,
            sample_rate,
            offset,
            samples: samples.into(),
        }
    }

    /// Create a frame of digital silence
    #[must_use]
    pub fn silent(seq: u64, sample_rate: u32, offset: Duration, len: usize) -> Self {
        Self::new(seq, sample_rate, offset, vec![0.0; len])
    }

    /// Monotonic sequence number within the capture session
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stream time of the first sample
    #[must_use]
    pub const fn offset(&self) -> Duration {
        self.offset
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock length of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len() as u128, self.sample_rate)
    }

    /// Stream time just past the last sample
    #[must_use]
    pub fn end(&self) -> Duration {
        self.offset + self.duration()
    }

    /// RMS energy of the frame
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Why an utterance was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Trailing silence detected
    Silence,
    /// Maximum duration reached
    Timeout,
}

/// One bounded span of captured speech
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    end_reason: EndReason,
    padded: usize,
}

impl Utterance {
    /// Finalize an utterance from collected frames
    ///
    /// `padded` counts trailing silent frames appended to reach the minimum length.
    #[must_use]
    pub const fn new(frames: Vec<AudioFrame>, end_reason: EndReason, padded: usize) -> Self {
        Self {
            frames,
            end_reason,
            padded,
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    #[must_use]
    pub const fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    /// Number of silent frames appended as padding
    #[must_use]
    pub const fn padded_frames(&self) -> usize {
        self.padded
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map_or(0, AudioFrame::sample_rate)
    }

    /// Total audio length
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// Concatenated samples in capture order
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        let mut out = Vec::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(frame.samples());
        }
        out
    }

    /// Encode as 16-bit mono WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        super::samples_to_wav(&self.samples(), self.sample_rate())
    }
}

/// Exact duration of `samples` at `sample_rate`, in whole nanoseconds
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn samples_to_duration(samples: u128, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(nanos as u64)
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        assert!(rms(&[0.0f32; 100]) < 0.001);
        assert!(rms(&[0.5f32; 100]) > 0.4);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_frame_timing() {
        let frame = AudioFrame::silent(3, 16_000, Duration::from_millis(240), 1280);
        assert_eq!(frame.duration(), Duration::from_millis(80));
        assert_eq!(frame.end(), Duration::from_millis(320));
    }

    #[test]
    fn test_utterance_concatenates_in_order() {
        let frames = vec![
            AudioFrame::new(0, 16_000, Duration::ZERO, vec![0.1, 0.2]),
            AudioFrame::new(1, 16_000, Duration::from_micros(125), vec![0.3]),
        ];
        let utterance = Utterance::new(frames, EndReason::Silence, 0);
        assert_eq!(utterance.samples(), vec![0.1, 0.2, 0.3]);
        assert_eq!(utterance.sample_rate(), 16_000);
    }
}
