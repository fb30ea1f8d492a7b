//! The text chain shared by voice and API mode

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::conversation::{ConversationContext, ConversationTurn};
use crate::llm::{IntentExtractor, ResponseGenerator};
use crate::modules::{ModuleRegistry, ModuleResult, ReplyKind, RoutingDecision};
use crate::voice::{Speaker, Transcriber, Utterance};
use crate::{Error, Result};

use super::{FALLBACK_REPLY, PipelineState, Shutdown, StateMachine, extract_command, with_deadline};

/// Deadline for each adapter call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub stt: Duration,
    pub llm: Duration,
    pub tts: Duration,
    pub module: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            stt: Duration::from_secs(15),
            llm: Duration::from_secs(30),
            tts: Duration::from_secs(15),
            module: Duration::from_secs(10),
        }
    }
}

/// Result of one pass through the text chain
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// Command text after wake word stripping
    pub command: String,
    pub reply: String,
    pub routing: RoutingDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleResult>,
    /// True when `reply` is the fallback apology
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    pub(super) fn fallback(command: &str, routing: RoutingDecision, error: Option<&Error>) -> Self {
        Self {
            command: command.to_string(),
            reply: FALLBACK_REPLY.to_string(),
            routing,
            module: None,
            fallback: true,
            error: error.map(ToString::to_string),
        }
    }
}

/// Composes the adapters and the module registry
pub struct Orchestrator {
    modules: Arc<ModuleRegistry>,
    generator: Arc<dyn ResponseGenerator>,
    intents: Option<Arc<dyn IntentExtractor>>,
    transcriber: Arc<dyn Transcriber>,
    speaker: Arc<dyn Speaker>,
    timeouts: StageTimeouts,
    wake_word: String,
    shutdown: Shutdown,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("modules", &self.modules)
            .field("timeouts", &self.timeouts)
            .field("wake_word", &self.wake_word)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        modules: Arc<ModuleRegistry>,
        generator: Arc<dyn ResponseGenerator>,
        transcriber: Arc<dyn Transcriber>,
        speaker: Arc<dyn Speaker>,
    ) -> Self {
        Self {
            modules,
            generator,
            intents: None,
            transcriber,
            speaker,
            timeouts: StageTimeouts::default(),
            wake_word: crate::config::DEFAULT_WAKE_WORD.to_string(),
            shutdown: Shutdown::never(),
        }
    }

    /// Consult `extractor` when no trigger pattern matches
    #[must_use]
    pub fn intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.intents = Some(extractor);
        self
    }

    #[must_use]
    pub const fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn wake_word(mut self, word: impl Into<String>) -> Self {
        self.wake_word = word.into();
        self
    }

    /// Cancel in-flight adapter calls when `shutdown` fires
    #[must_use]
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub const fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    #[must_use]
    pub fn wake_word_str(&self) -> &str {
        &self.wake_word
    }

    /// Transcribe an utterance within the STT deadline
    ///
    /// # Errors
    ///
    /// Returns the adapter error, `Error::Timeout` or `Error::Cancelled`
    pub async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        with_deadline(
            "stt",
            self.timeouts.stt,
            &self.shutdown,
            self.transcriber.transcribe(utterance),
        )
        .await
    }

    /// Synthesize speech within the TTS deadline
    ///
    /// # Errors
    ///
    /// Returns the adapter error, `Error::Timeout` or `Error::Cancelled`
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        with_deadline("tts", self.timeouts.tts, &self.shutdown, self.speaker.synthesize(text)).await
    }

    /// Route, dispatch and generate a reply for `text`
    ///
    /// Never fails: adapter errors move `states` to `Error` and yield the
    /// fallback reply. Successful turns are appended to `context`. The
    /// caller decides what follows `Responding`.
    pub async fn respond(
        &self,
        context: &mut ConversationContext,
        text: &str,
        states: &mut StateMachine,
    ) -> TurnOutcome {
        states.transition(PipelineState::Routing);
        let command = extract_command(text, &self.wake_word);

        if command.is_empty() {
            tracing::debug!("empty command, nothing to route");
            states.transition(PipelineState::Responding);
            return TurnOutcome::fallback(&command, RoutingDecision::general(&command), None);
        }

        let routing = self
            .modules
            .route_with_fallback(&command, self.intents.as_deref())
            .await;
        tracing::info!(
            command = %command,
            module = routing.module_id.as_deref().unwrap_or("none"),
            source = ?routing.source,
            "routed"
        );

        states.transition(PipelineState::Responding);
        match self.reply(context, &command, &routing).await {
            Ok((reply, module)) => {
                context.push(ConversationTurn::now(
                    command.clone(),
                    routing.module_id.clone(),
                    reply.clone(),
                ));
                TurnOutcome {
                    command,
                    reply,
                    routing,
                    module,
                    fallback: false,
                    error: None,
                }
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, command = %command, "response failed, using fallback");
                } else {
                    tracing::error!(error = %e, command = %command, "response failed, using fallback");
                }
                states.transition(PipelineState::Error);
                TurnOutcome::fallback(&command, routing, Some(&e))
            }
        }
    }

    async fn reply(
        &self,
        context: &ConversationContext,
        command: &str,
        routing: &RoutingDecision,
    ) -> Result<(String, Option<ModuleResult>)> {
        let module = with_deadline(
            "module",
            self.timeouts.module,
            &self.shutdown,
            self.modules.dispatch(routing),
        )
        .await?;

        if let Some(result) = &module
            && result.kind == ReplyKind::Final
        {
            return Ok((result.text.clone(), module));
        }

        let reply = with_deadline(
            "llm",
            self.timeouts.llm,
            &self.shutdown,
            self.generator.generate(context, command, module.as_ref()),
        )
        .await?;

        Ok((reply, module))
    }
}
