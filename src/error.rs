//! Error types for the Capri voice assistant

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Capri operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal only at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text engine failure
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model failure
    #[error("inference error: {0}")]
    Inference(String),

    /// Text-to-speech engine failure
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake word classifier failure
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// An adapter call exceeded its deadline
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Pipeline stage that stalled
        stage: &'static str,
        /// Configured deadline
        after: Duration,
    },

    /// The session was shut down while a call was in flight
    #[error("cancelled")]
    Cancelled,

    /// Device control error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this is a per-utterance adapter failure the loop recovers from
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Stt(_) | Self::Inference(_) | Self::Tts(_) | Self::Timeout { .. } | Self::Http(_)
        )
    }
}

/// Failures raised while controlling a smart-home device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No device matches the reference
    #[error("I don't know a device called {0}.")]
    NotFound(String),

    /// The device type does not allow the requested action
    #[error("the {device} can't {action}")]
    UnsupportedAction {
        /// Display name of the device
        device: String,
        /// Requested action
        action: String,
    },

    /// The device answered with an error or could not be reached
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The device did not answer within the configured timeout
    #[error("device timed out: {0}")]
    Timeout(String),
}
