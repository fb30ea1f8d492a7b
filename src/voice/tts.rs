//! Text-to-speech (TTS) processing

use async_trait::async_trait;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Turns reply text into encoded audio
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Synthesize text to audio bytes (MP3 or WAV)
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes via an OpenAI-compatible `/v1/audio/speech` endpoint
///
/// Compatible with Kokoro-FastAPI, Piper HTTP bridges and `OpenAI`.
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    voice: String,
    speed: f64,
    api_key: Option<String>,
}

impl SpeechSynthesizer {
    /// Create a synthesizer for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(config: &TtsConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("tts.base_url is required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/audio/speech", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Speaker for SpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
            response_format: &'a str,
        }

        if text.trim().is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        tracing::debug!(bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}

/// MIME type of encoded audio, sniffed from its header
#[must_use]
pub fn audio_mime(audio: &[u8]) -> &'static str {
    if audio.starts_with(b"RIFF") {
        "audio/wav"
    } else {
        "audio/mpeg"
    }
}
