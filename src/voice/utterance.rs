//! Utterance collection after a wake trigger
//!
//! Frames are gathered until a run of silent frames closes the utterance or
//! the maximum duration is reached, whichever comes first.

use std::time::Duration;

use crate::config::UtteranceConfig;

use super::{AudioFrame, EndReason, Utterance};

/// Buffers frames into one utterance per trigger
#[derive(Debug)]
pub struct UtteranceCollector {
    config: UtteranceConfig,
    frames: Vec<AudioFrame>,
    collected: Duration,
    silent_run: usize,
    heard_speech: bool,
    active: bool,
}

impl UtteranceCollector {
    #[must_use]
    pub const fn new(config: UtteranceConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            collected: Duration::ZERO,
            silent_run: 0,
            heard_speech: false,
            active: false,
        }
    }

    /// Begin collecting a new utterance, discarding any partial one
    pub fn start(&mut self) {
        self.reset();
        self.active = true;
        tracing::debug!("collecting utterance");
    }

    /// Whether a collection is in progress
    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        self.active
    }

    /// Feed one frame; returns the finalized utterance once it ends
    pub fn feed(&mut self, frame: AudioFrame) -> Option<Utterance> {
        if !self.active {
            tracing::trace!(seq = frame.seq(), "frame fed to idle collector, ignoring");
            return None;
        }

        let silent = frame.rms() < self.config.silence_threshold;
        if silent {
            self.silent_run += 1;
        } else {
            self.silent_run = 0;
            self.heard_speech = true;
        }

        self.collected += frame.duration();
        self.frames.push(frame);

        if self.silent_run >= self.config.silence_frames {
            return Some(self.finish(EndReason::Silence));
        }
        if self.collected >= self.config.max_duration {
            return Some(self.finish(EndReason::Timeout));
        }
        None
    }

    /// Drop any partial utterance and go idle
    pub fn reset(&mut self) {
        self.frames.clear();
        self.collected = Duration::ZERO;
        self.silent_run = 0;
        self.heard_speech = false;
        self.active = false;
    }

    fn finish(&mut self, reason: EndReason) -> Utterance {
        let mut frames = std::mem::take(&mut self.frames);
        let padded = pad_to_minimum(&mut frames, self.config.min_frames);

        tracing::debug!(
            frames = frames.len(),
            padded,
            duration_ms = self.collected.as_millis(),
            heard_speech = self.heard_speech,
            ?reason,
            "utterance finalized"
        );

        self.reset();
        Utterance::new(frames, reason, padded)
    }
}

/// Append silent frames until `frames` holds at least `min_frames`
fn pad_to_minimum(frames: &mut Vec<AudioFrame>, min_frames: usize) -> usize {
    let Some(last) = frames.last().cloned() else {
        return 0;
    };

    let mut padded = 0;
    let mut seq = last.seq();
    let mut offset = last.end();
    while frames.len() < min_frames {
        seq += 1;
        let frame = AudioFrame::silent(seq, last.sample_rate(), offset, last.len());
        offset = frame.end();
        frames.push(frame);
        padded += 1;
    }
    padded
}
