//! Capri - a local voice assistant
//!
//! This library provides the orchestration core of the assistant:
//! - Audio capture, wake word gating and utterance collection
//! - Speech-to-text, response generation and text-to-speech adapters
//! - Capability modules, with home control over HTTP and MQTT
//! - Voice and HTTP API front ends
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Microphone ─► FrameQueue ─► WakeGate ─► Collector  │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ Utterance
//! ┌───────────────────────────▼──────────────────────────┐
//! │  Orchestrator: STT ─► Router ─► Module ─► LLM ─► TTS │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ audio
//!                          Speaker
//! ```

pub mod api;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod modules;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use daemon::{Daemon, Mode};
pub use error::{DeviceError, Error, Result};
