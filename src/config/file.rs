//! TOML configuration file loading
//!
//! Supports `~/.config/capri/config.toml` as a persistent config source.
//! All fields are optional and the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapriConfigFile {
    #[serde(default)]
    pub audio: AudioFileConfig,

    #[serde(default)]
    pub wake: WakeFileConfig,

    #[serde(default)]
    pub utterance: UtteranceFileConfig,

    #[serde(default)]
    pub stt: EngineFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub conversation: ConversationFileConfig,

    #[serde(default)]
    pub home: HomeFileConfig,

    #[serde(default)]
    pub routing: RoutingFileConfig,

    #[serde(default)]
    pub api: ApiFileConfig,
}

/// Capture settings
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Pipeline sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Samples per audio frame
    pub frame_samples: Option<usize>,

    /// Capacity of the capture queue, in frames
    pub queue_frames: Option<usize>,

    /// Discard frames queued while a turn was being handled
    pub flush_after_turn: Option<bool>,
}

/// Wake gate tuning
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Wake word (e.g. "capri")
    pub word: Option<String>,

    /// Classifier score needed to trigger, inclusive
    pub threshold: Option<f32>,

    /// Classifier window, in frames
    pub window_frames: Option<usize>,

    /// Frames between classifier invocations
    pub stride_frames: Option<usize>,

    /// Minimum time between two triggers
    pub cooldown_ms: Option<u64>,
}

/// Utterance end-pointing
#[derive(Debug, Default, Deserialize)]
pub struct UtteranceFileConfig {
    /// RMS below which a frame counts as silent
    pub silence_threshold: Option<f32>,

    /// Consecutive silent frames that close an utterance
    pub silence_frames: Option<usize>,

    /// Hard cap on utterance length
    pub max_duration_ms: Option<u64>,

    /// Shortest utterance handed to the transcriber
    pub min_frames: Option<usize>,
}

/// Generic HTTP engine endpoint
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Language model endpoint
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

/// Speech synthesis endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub voice: Option<String>,
    pub speed: Option<f64>,
}

/// Conversation memory limits
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Turns kept per conversation
    pub max_turns: Option<usize>,

    /// API-mode contexts kept before the least recently used is evicted
    pub max_contexts: Option<usize>,
}

/// Home automation module
#[derive(Debug, Default, Deserialize)]
pub struct HomeFileConfig {
    pub enabled: Option<bool>,

    /// Path to the persisted device registry (JSON)
    pub registry_path: Option<String>,

    pub http_timeout_ms: Option<u64>,
    pub mqtt_timeout_ms: Option<u64>,

    /// How long an unacknowledged MQTT status is trusted
    pub optimistic_ttl_secs: Option<u64>,
}

/// Intent routing
#[derive(Debug, Default, Deserialize)]
pub struct RoutingFileConfig {
    /// Ask the LLM to pick a module when no trigger pattern matches
    pub llm_intent_fallback: Option<bool>,
}

/// API server
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML for this schema
pub fn read_config_file(path: &Path) -> Result<CapriConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let parsed = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(parsed)
}

/// Return the config file path: `~/.config/capri/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("capri").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let parsed: CapriConfigFile = toml::from_str(
            r#"
            [wake]
            word = "jarvis"
            cooldown_ms = 1500

            [home]
            registry_path = "/tmp/devices.json"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.wake.word.as_deref(), Some("jarvis"));
        assert_eq!(parsed.wake.cooldown_ms, Some(1500));
        assert!(parsed.wake.threshold.is_none());
        assert!(parsed.api.port.is_none());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let parsed: std::result::Result<CapriConfigFile, _> = toml::from_str("[bogus]\nx = 1\n");
        assert!(parsed.is_err());
    }
}
