//! Wake word gating
//!
//! Keeps a rolling window of the most recent frames and asks a classifier
//! for a wake word score every `stride` frames. A score at or above the
//! threshold triggers, after which the gate stays quiet for a cooldown
//! measured on the capture clock.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::WakeConfig;
use crate::Result;

use super::AudioFrame;
use super::frame::rms;

/// Scores a window of audio for presence of the wake word
pub trait WakeWordClassifier: Send {
    /// Return a score in `0.0..=1.0` for the given window
    ///
    /// # Errors
    ///
    /// Returns error if the classifier cannot evaluate the window
    fn score(&mut self, window: &[f32]) -> Result<f32>;
}

/// Energy-based stand-in for a trained wake word model
///
/// Maps window RMS linearly onto `0.0..=1.0`, saturating at `full_scale`.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    full_scale: f32,
}

impl EnergyClassifier {
    #[must_use]
    pub const fn new(full_scale: f32) -> Self {
        Self { full_scale }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(0.06)
    }
}

impl WakeWordClassifier for EnergyClassifier {
    fn score(&mut self, window: &[f32]) -> Result<f32> {
        if self.full_scale <= 0.0 {
            return Err(crate::Error::WakeWord("full scale must be positive".to_string()));
        }
        Ok((rms(window) / self.full_scale).clamp(0.0, 1.0))
    }
}

/// Emitted when the wake word is detected
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSignal {
    /// Classifier score that caused the trigger
    pub score: f32,
    /// Sequence number of the frame that completed the window
    pub seq: u64,
    /// Stream time at the end of that frame
    pub at: Duration,
}

/// Rolling-window wake word gate with stride and cooldown
pub struct WakeGate {
    classifier: Box<dyn WakeWordClassifier>,
    window: VecDeque<AudioFrame>,
    window_frames: usize,
    stride_frames: usize,
    threshold: f32,
    cooldown: Duration,
    since_eval: usize,
    last_trigger: Option<Duration>,
}

impl std::fmt::Debug for WakeGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeGate")
            .field("window_frames", &self.window_frames)
            .field("stride_frames", &self.stride_frames)
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("buffered", &self.window.len())
            .finish_non_exhaustive()
    }
}

impl WakeGate {
    /// Create a gate around a classifier
    #[must_use]
    pub fn new(classifier: Box<dyn WakeWordClassifier>, config: &WakeConfig) -> Self {
        let window_frames = config.window_frames.max(1);

        tracing::debug!(
            wake_word = %config.word,
            window_frames,
            stride_frames = config.stride_frames,
            threshold = config.threshold,
            cooldown_ms = config.cooldown.as_millis(),
            "wake gate initialized"
        );

        Self {
            classifier,
            window: VecDeque::with_capacity(window_frames),
            window_frames,
            stride_frames: config.stride_frames.max(1),
            threshold: config.threshold,
            cooldown: config.cooldown,
            since_eval: 0,
            last_trigger: None,
        }
    }

    /// Feed one frame; returns a trigger when the wake word fires
    pub fn feed(&mut self, frame: AudioFrame) -> Option<TriggerSignal> {
        let seq = frame.seq();
        let at = frame.end();

        if self.window.len() == self.window_frames {
            self.window.pop_front();
        }
        self.window.push_back(frame);

        self.since_eval += 1;
        if self.since_eval < self.stride_frames {
            return None;
        }
        self.since_eval = 0;

        let samples = self.window_samples();
        let score = match self.classifier.score(&samples) {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(error = %e, seq, "wake classifier failed, treating as not triggered");
                return None;
            }
        };

        tracing::trace!(score, seq, "wake score");

        if score < self.threshold {
            return None;
        }

        if let Some(last) = self.last_trigger {
            let elapsed = at.saturating_sub(last);
            if elapsed < self.cooldown {
                tracing::debug!(score, elapsed_ms = elapsed.as_millis(), "wake suppressed by cooldown");
                return None;
            }
        }

        self.last_trigger = Some(at);
        tracing::info!(score, seq, "wake word detected");
        Some(TriggerSignal { score, seq, at })
    }

    /// Clear the rolling window, keeping the cooldown clock
    pub fn reset_window(&mut self) {
        self.window.clear();
        self.since_eval = 0;
    }

    /// Whether a trigger at stream time `at` would be suppressed
    #[must_use]
    pub fn in_cooldown(&self, at: Duration) -> bool {
        self.last_trigger
            .is_some_and(|last| at.saturating_sub(last) < self.cooldown)
    }

    /// Concatenate the window, zero-padding the front up to the full window length
    fn window_samples(&self) -> Vec<f32> {
        let frame_len = self.window.iter().map(AudioFrame::len).max().unwrap_or(0);
        let target = frame_len * self.window_frames;
        let have: usize = self.window.iter().map(AudioFrame::len).sum();

        let mut samples = Vec::with_capacity(target.max(have));
        if have < target {
            tracing::trace!(
                missing = target - have,
                "wake window short, zero-padding"
            );
            samples.resize(target - have, 0.0);
        }
        for frame in &self.window {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Result<f32>>);

    impl WakeWordClassifier for Fixed {
        fn score(&mut self, _window: &[f32]) -> Result<f32> {
            if self.0.is_empty() {
                return Ok(0.0);
            }
            self.0.remove(0)
        }
    }

    fn config(stride: usize, cooldown_ms: u64) -> WakeConfig {
        WakeConfig {
            word: "capri".to_string(),
            threshold: 0.5,
            window_frames: 3,
            stride_frames: stride,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::silent(seq, 16_000, Duration::from_millis(seq * 100), 1600)
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut gate = WakeGate::new(Box::new(Fixed(vec![Ok(0.5)])), &config(1, 0));
        assert!(gate.feed(frame(0)).is_some());
    }

    #[test]
    fn test_stride_skips_frames() {
        let mut gate = WakeGate::new(Box::new(Fixed(vec![Ok(0.9), Ok(0.9)])), &config(3, 0));
        assert!(gate.feed(frame(0)).is_none());
        assert!(gate.feed(frame(1)).is_none());
        let signal = gate.feed(frame(2)).unwrap();
        assert_eq!(signal.seq, 2);
    }

    #[test]
    fn test_classifier_error_is_not_triggered() {
        let mut gate = WakeGate::new(
            Box::new(Fixed(vec![Err(crate::Error::WakeWord("boom".into())), Ok(0.9)])),
            &config(1, 0),
        );
        assert!(gate.feed(frame(0)).is_none());
        assert!(gate.feed(frame(1)).is_some());
    }

    #[test]
    fn test_short_window_is_zero_padded() {
        let gate = {
            let mut gate = WakeGate::new(Box::new(EnergyClassifier::default()), &config(10, 0));
            gate.feed(frame(0));
            gate
        };
        assert_eq!(gate.window_samples().len(), 1600 * 3);
    }

    #[test]
    fn test_energy_classifier_saturates() {
        let mut classifier = EnergyClassifier::new(0.1);
        assert!(classifier.score(&[0.0; 64]).unwrap() < 0.01);
        assert!((classifier.score(&[0.5; 64]).unwrap() - 1.0).abs() < f32::EPSILON);
    }
}
