//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::config::SttConfig;
use crate::{Error, Result};

use super::Utterance;

/// Converts a finalized utterance to text
///
/// Silence or unintelligible audio yields an empty string, not an error.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` if the engine fails
    async fn transcribe(&self, utterance: &Utterance) -> Result<String>;
}

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Markers whisper-style engines emit for non-speech audio
const NON_SPEECH_MARKERS: &[&str] = &["[BLANK_AUDIO]", "[SILENCE]", "(silence)", "[NO_SPEECH]"];

/// Transcribes via an OpenAI-compatible `/v1/audio/transcriptions` endpoint
///
/// Works with whisper.cpp's server, faster-whisper servers and `OpenAI` itself.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl WhisperTranscriber {
    /// Create a transcriber for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(config: &SttConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("stt.base_url is required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        let audio = utterance.to_wav()?;
        tracing::debug!(
            audio_bytes = audio.len(),
            duration_ms = utterance.duration().as_millis(),
            "starting transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "json");

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            Error::Stt(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "STT API error");
            return Err(Error::Stt(format!("STT API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("invalid STT response: {e}")))?;

        let transcript = clean_transcript(&result.text);
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Trim whitespace and strip non-speech markers
#[must_use]
pub fn clean_transcript(raw: &str) -> String {
    let mut text = raw.to_string();
    for marker in NON_SPEECH_MARKERS {
        text = text.replace(marker, " ");
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_transcript() {
        assert_eq!(clean_transcript("  turn on the light \n"), "turn on the light");
        assert_eq!(clean_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(clean_transcript(" (silence) hello"), "hello");
    }

    #[test]
    fn test_requires_base_url() {
        let config = SttConfig {
            base_url: "  ".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(matches!(WhisperTranscriber::new(&config), Err(Error::Config(_))));
    }
}
