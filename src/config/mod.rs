//! Configuration management for the Capri assistant

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use self::file::CapriConfigFile;
use crate::{Error, Result};

/// Default wake word
pub const DEFAULT_WAKE_WORD: &str = "capri";

/// Resolved assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio capture configuration
    pub audio: AudioConfig,

    /// Wake gate configuration
    pub wake: WakeConfig,

    /// Utterance end-pointing configuration
    pub utterance: UtteranceConfig,

    /// Speech-to-text engine
    pub stt: SttConfig,

    /// Language model engine
    pub llm: LlmConfig,

    /// Text-to-speech engine
    pub tts: TtsConfig,

    /// Conversation memory
    pub conversation: ConversationConfig,

    /// Home automation module
    pub home: HomeConfig,

    /// HTTP API server configuration
    pub api: ApiServerConfig,

    /// Where this configuration was loaded from, if anywhere
    pub source: Option<PathBuf>,
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub queue_frames: usize,
    /// Drop audio queued during a turn instead of feeding it to the wake gate
    pub flush_after_turn: bool,
}

impl AudioConfig {
    /// Wall-clock length of one frame
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        crate::voice::samples_to_duration(self.frame_samples as u128, self.sample_rate)
    }
}

/// Wake gate configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub word: String,
    pub threshold: f32,
    pub window_frames: usize,
    pub stride_frames: usize,
    pub cooldown: Duration,
}

/// Utterance collector configuration
#[derive(Debug, Clone)]
pub struct UtteranceConfig {
    pub silence_threshold: f32,
    pub silence_frames: usize,
    pub max_duration: Duration,
    pub min_frames: usize,
}

/// Speech-to-text engine configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Base URL of an OpenAI-compatible transcription server
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions server
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
    /// Ask the model for a module id when no trigger pattern matches
    pub intent_fallback: bool,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: f64,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Conversation memory configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub max_turns: usize,
    pub max_contexts: usize,
}

/// Home automation configuration
#[derive(Debug, Clone)]
pub struct HomeConfig {
    pub enabled: bool,
    pub registry_path: PathBuf,
    pub http_timeout: Duration,
    pub mqtt_timeout: Duration,
    pub optimistic_ttl: Duration,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(CapriConfigFile::default(), None)
    }
}

/// Return the data directory, e.g. `~/.local/share/capri` on Linux
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "capri", "capri")
        .map_or_else(|| PathBuf::from(".capri"), |d| d.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist and parse. Without one, the standard
    /// location is used when present and defaults apply otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if a config file cannot be read, parsed or validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, source) = match path {
            Some(p) => (file::read_config_file(p)?, Some(p.to_path_buf())),
            None => match file::config_file_path() {
                Some(p) if p.exists() => (file::read_config_file(&p)?, Some(p)),
                _ => {
                    tracing::debug!("no config file found, using defaults");
                    (CapriConfigFile::default(), None)
                }
            },
        };

        let config = Self::from_file(file, source);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid or fails validation
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: CapriConfigFile =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        let config = Self::from_file(file, None);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a parsed file against defaults
    #[must_use]
    pub fn from_file(file: CapriConfigFile, source: Option<PathBuf>) -> Self {
        let ms = Duration::from_millis;

        let audio = AudioConfig {
            sample_rate: file.audio.sample_rate.unwrap_or(16_000),
            frame_samples: file.audio.frame_samples.unwrap_or(1280),
            queue_frames: file.audio.queue_frames.unwrap_or(250),
            flush_after_turn: file.audio.flush_after_turn.unwrap_or(false),
        };

        let wake = WakeConfig {
            word: file
                .wake
                .word
                .map_or_else(|| DEFAULT_WAKE_WORD.to_string(), |w| w.trim().to_lowercase()),
            threshold: file.wake.threshold.unwrap_or(0.5),
            window_frames: file.wake.window_frames.unwrap_or(12),
            stride_frames: file.wake.stride_frames.unwrap_or(2),
            cooldown: ms(file.wake.cooldown_ms.unwrap_or(2000)),
        };

        let utterance = UtteranceConfig {
            silence_threshold: file.utterance.silence_threshold.unwrap_or(0.01),
            silence_frames: file.utterance.silence_frames.unwrap_or(10),
            max_duration: ms(file.utterance.max_duration_ms.unwrap_or(8000)),
            min_frames: file.utterance.min_frames.unwrap_or(4),
        };

        let stt = SttConfig {
            base_url: file
                .stt
                .base_url
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            model: file.stt.model.unwrap_or_else(|| "whisper-1".to_string()),
            api_key: file.stt.api_key.or_else(|| std::env::var("CAPRI_STT_API_KEY").ok()),
            timeout: ms(file.stt.timeout_ms.unwrap_or(15_000)),
        };

        let llm = LlmConfig {
            base_url: file
                .llm
                .base_url
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            model: file.llm.model.unwrap_or_else(|| "gemma2:2b".to_string()),
            api_key: file.llm.api_key.or_else(|| std::env::var("CAPRI_LLM_API_KEY").ok()),
            timeout: ms(file.llm.timeout_ms.unwrap_or(30_000)),
            max_tokens: file.llm.max_tokens.unwrap_or(256),
            temperature: file.llm.temperature.unwrap_or(0.7),
            system_prompt: file.llm.system_prompt.unwrap_or_else(|| {
                "You are Capri, a local voice assistant. Keep responses short and conversational."
                    .to_string()
            }),
            intent_fallback: file.routing.llm_intent_fallback.unwrap_or(false),
        };

        let tts = TtsConfig {
            base_url: file
                .tts
                .base_url
                .unwrap_or_else(|| "http://127.0.0.1:8880".to_string()),
            model: file.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: file.tts.voice.unwrap_or_else(|| "alloy".to_string()),
            speed: file.tts.speed.unwrap_or(1.0),
            api_key: file.tts.api_key.or_else(|| std::env::var("CAPRI_TTS_API_KEY").ok()),
            timeout: ms(file.tts.timeout_ms.unwrap_or(15_000)),
        };

        let conversation = ConversationConfig {
            max_turns: file.conversation.max_turns.unwrap_or(10),
            max_contexts: file.conversation.max_contexts.unwrap_or(64),
        };

        let home = HomeConfig {
            enabled: file.home.enabled.unwrap_or(true),
            registry_path: file
                .home
                .registry_path
                .map_or_else(|| data_dir().join("home_config.json"), PathBuf::from),
            http_timeout: ms(file.home.http_timeout_ms.unwrap_or(5000)),
            mqtt_timeout: ms(file.home.mqtt_timeout_ms.unwrap_or(5000)),
            optimistic_ttl: Duration::from_secs(file.home.optimistic_ttl_secs.unwrap_or(30)),
        };

        let api = ApiServerConfig {
            host: file.api.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: file.api.port.unwrap_or(8000),
        };

        Self {
            audio,
            wake,
            utterance,
            stt,
            llm,
            tts,
            conversation,
            home,
            api,
            source,
        }
    }

    /// Replace the wake word (CLI override)
    #[must_use]
    pub fn with_wake_word(mut self, word: Option<String>) -> Self {
        if let Some(word) = word {
            self.wake.word = word.trim().to_lowercase();
        }
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.audio.sample_rate == 0 || self.audio.frame_samples == 0 {
            return fail("audio.sample_rate and audio.frame_samples must be positive");
        }
        if self.audio.queue_frames == 0 {
            return fail("audio.queue_frames must be at least 1");
        }
        if self.wake.word.is_empty() {
            return fail("wake.word must not be empty");
        }
        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return fail("wake.threshold must be within 0.0..=1.0");
        }
        if self.wake.window_frames == 0 || self.wake.stride_frames == 0 {
            return fail("wake.window_frames and wake.stride_frames must be at least 1");
        }
        if self.utterance.silence_frames == 0 {
            return fail("utterance.silence_frames must be at least 1");
        }
        if self.utterance.max_duration.is_zero() {
            return fail("utterance.max_duration_ms must be positive");
        }
        if self.conversation.max_turns == 0 || self.conversation.max_contexts == 0 {
            return fail("conversation limits must be at least 1");
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return fail("tts.speed must be within 0.25..=4.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.wake.word, "capri");
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.frame_duration(), Duration::from_millis(80));
    }

    #[test]
    fn test_overlay_and_override() {
        let config = Config::from_toml(
            r#"
            [wake]
            word = "  Jarvis "
            threshold = 0.8

            [api]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.wake.word, "jarvis");
        assert!((config.wake.threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.api.port, 9000);

        let config = config.with_wake_word(Some("Juniper".to_string()));
        assert_eq!(config.wake.word, "juniper");
    }

    #[test]
    fn test_flush_after_turn_is_opt_in() {
        assert!(!Config::default().audio.flush_after_turn);
        let config = Config::from_toml("[audio]\nflush_after_turn = true\n").unwrap();
        assert!(config.audio.flush_after_turn);
    }

    #[test]
    fn test_invalid_threshold() {
        let err = Config::from_toml("[wake]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let err = Config::load(Some(Path::new("/nonexistent/capri.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
