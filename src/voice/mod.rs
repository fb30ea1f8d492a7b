//! Voice processing module
//!
//! Capture produces frames into a bounded [`FrameQueue`]; the voice session
//! drains it through the [`WakeGate`] and [`UtteranceCollector`] before the
//! finalized utterance reaches a [`Transcriber`]. Speech goes out through a
//! [`Speaker`] and an [`AudioSink`].

mod capture;
mod frame;
mod playback;
pub(crate) mod resample;
mod stream;
mod stt;
mod tts;
mod utterance;
mod wake_word;

pub use capture::{AudioCapture, samples_to_wav};
pub use frame::{AudioFrame, EndReason, Utterance, rms, samples_to_duration};
pub use playback::{AudioPlayback, AudioSink, decode_audio};
pub use stream::{FrameQueue, Framer};
pub use stt::{Transcriber, WhisperTranscriber, clean_transcript};
pub use tts::{SpeechSynthesizer, Speaker, audio_mime};
pub use utterance::UtteranceCollector;
pub use wake_word::{EnergyClassifier, TriggerSignal, WakeGate, WakeWordClassifier};
