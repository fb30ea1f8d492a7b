//! The orchestration core
//!
//! [`Orchestrator`] runs the text chain (routing, module dispatch, response
//! generation, synthesis) and is shared by both modes. [`VoiceSession`] adds
//! the audio states in front of it and loops until shutdown.

mod orchestrator;
mod session;
mod state;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::{Error, Result};

pub use orchestrator::{Orchestrator, StageTimeouts, TurnOutcome};
pub use session::VoiceSession;
pub use state::{PipelineState, StateMachine};

/// Reply used whenever an adapter fails
pub const FALLBACK_REPLY: &str = "Sorry, I didn't catch that";

/// Sends the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    /// Signal every [`Shutdown`] listener
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Session-wide cancellation signal
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Create a connected trigger and listener
    #[must_use]
    pub fn channel() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Self(rx))
    }

    /// A listener that never fires
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self(rx)
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once shutdown is requested
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run `fut` with a deadline, giving up early on shutdown
///
/// # Errors
///
/// Returns `Error::Timeout` when the deadline passes, `Error::Cancelled` on
/// shutdown, or the future's own error
pub async fn with_deadline<T, F>(
    stage: &'static str,
    after: Duration,
    shutdown: &Shutdown,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = shutdown.wait() => {
            tracing::debug!(stage, "call cancelled by shutdown");
            Err(Error::Cancelled)
        }
        result = tokio::time::timeout(after, fut) => {
            result.map_err(|_| Error::Timeout { stage, after })?
        }
    }
}

/// Strip a leading wake word from a transcript
///
/// "Capri, turn on the light" becomes "turn on the light". Text without
/// the wake word is returned trimmed but otherwise unchanged.
#[must_use]
pub fn extract_command(transcript: &str, wake_word: &str) -> String {
    let trimmed = transcript.trim();
    let wake = wake_word.trim();
    if wake.is_empty() {
        return trimmed.to_string();
    }

    let lower = trimmed.to_lowercase();
    let wake_lower = wake.to_lowercase();
    let leading = lower
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .starts_with(&wake_lower);

    if !leading || lower.len() != trimmed.len() {
        return trimmed.to_string();
    }

    let start = lower.find(&wake_lower).unwrap_or(0) + wake_lower.len();
    let rest = &trimmed[start..];
    if rest.chars().next().is_some_and(char::is_alphanumeric) {
        // "capricorn" is not the wake word
        return trimmed.to_string();
    }

    rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_command() {
        assert_eq!(
            extract_command("Capri, turn on bedroom light", "capri"),
            "turn on bedroom light"
        );
        assert_eq!(extract_command("capri", "capri"), "");
        assert_eq!(
            extract_command("turn on bedroom light", "capri"),
            "turn on bedroom light"
        );
        assert_eq!(
            extract_command("Capricorn is a sign", "capri"),
            "Capricorn is a sign"
        );
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let shutdown = Shutdown::never();
        let result: Result<()> = with_deadline(
            "stt",
            Duration::from_millis(10),
            &shutdown,
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout { stage: "stt", .. })));
    }

    #[tokio::test]
    async fn test_deadline_cancelled() {
        let (trigger, shutdown) = Shutdown::channel();
        trigger.trigger();
        let result: Result<()> =
            with_deadline("llm", Duration::from_secs(60), &shutdown, std::future::pending()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_passes_value() {
        let shutdown = Shutdown::never();
        let value = with_deadline("tts", Duration::from_secs(1), &shutdown, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
