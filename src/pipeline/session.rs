//! The voice-mode loop
//!
//! Consumes frames from the capture queue on its own task. Only one
//! utterance is in flight at a time; frames captured meanwhile wait in the
//! bounded queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::Error;
use crate::conversation::ConversationContext;
use crate::voice::{AudioSink, FrameQueue, Utterance, UtteranceCollector, WakeGate};

use super::{
    FALLBACK_REPLY, Orchestrator, PipelineState, Shutdown, StateMachine, TurnOutcome, with_deadline,
};

/// Upper bound on playing one reply
const PLAYBACK_LIMIT: Duration = Duration::from_secs(60);

/// One live voice session
pub struct VoiceSession {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<FrameQueue>,
    gate: WakeGate,
    collector: UtteranceCollector,
    sink: Arc<dyn AudioSink>,
    context: ConversationContext,
    states: StateMachine,
    shutdown: Shutdown,
    flush_after_turn: bool,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("state", &self.states.current())
            .field("queued", &self.queue.len())
            .field("turns", &self.context.len())
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<FrameQueue>,
        gate: WakeGate,
        collector: UtteranceCollector,
        sink: Arc<dyn AudioSink>,
        context: ConversationContext,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            gate,
            collector,
            sink,
            context,
            states: StateMachine::new(),
            shutdown: Shutdown::never(),
            flush_after_turn: false,
        }
    }

    /// Stop the loop and cancel in-flight calls when `shutdown` fires
    #[must_use]
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Discard frames queued while a turn was handled
    #[must_use]
    pub const fn flush_after_turn(mut self, flush: bool) -> Self {
        self.flush_after_turn = flush;
        self
    }

    /// Observe state transitions
    #[must_use]
    pub fn states(&self) -> watch::Receiver<PipelineState> {
        self.states.subscribe()
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.states.current()
    }

    #[must_use]
    pub const fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Run until shutdown or until the frame queue closes
    pub async fn run(&mut self) {
        self.states.transition(PipelineState::ListeningForWake);
        tracing::info!(wake_word = %self.orchestrator.wake_word_str(), "listening for wake word");

        loop {
            let frame = tokio::select! {
                biased;
                () = self.shutdown.wait() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                frame = self.queue.pop() => frame,
            };

            let Some(frame) = frame else {
                tracing::info!("audio stream closed");
                break;
            };

            if self.collector.is_collecting() {
                if let Some(utterance) = self.collector.feed(frame) {
                    self.handle_utterance(utterance).await;
                    self.resume_listening();
                }
            } else if self.gate.feed(frame).is_some() {
                self.states.transition(PipelineState::CollectingUtterance);
                self.collector.start();
            }
        }

        self.collector.reset();
        self.states.transition(PipelineState::Idle);
    }

    /// Take one finalized utterance through to spoken output
    ///
    /// Ends in `Idle` whatever happens along the way.
    pub async fn handle_utterance(&mut self, utterance: Utterance) -> TurnOutcome {
        self.states.transition(PipelineState::Transcribing);

        let outcome = match self.orchestrator.transcribe(&utterance).await {
            Ok(text) => {
                tracing::debug!(transcript = %text, "utterance transcribed");
                self.orchestrator
                    .respond(&mut self.context, &text, &mut self.states)
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.states.transition(PipelineState::Error);
                TurnOutcome::fallback("", crate::modules::RoutingDecision::general(""), Some(&e))
            }
        };

        drop(utterance);
        self.speak(&outcome.reply).await;
        self.states.transition(PipelineState::Idle);
        outcome
    }

    /// Speak `text`, falling back to the stock reply once if that fails
    async fn speak(&mut self, text: &str) {
        if self.shutdown.is_triggered() {
            return;
        }
        self.states.transition(PipelineState::Speaking);

        let error = match say(&self.orchestrator, self.sink.as_ref(), &self.shutdown, text).await {
            Ok(()) => {
                tracing::debug!(chars = text.len(), "reply spoken");
                return;
            }
            Err(Error::Cancelled) => {
                tracing::debug!("speech cancelled");
                return;
            }
            Err(e) => e,
        };

        tracing::warn!(error = %error, "could not speak reply");
        if text != FALLBACK_REPLY {
            match say(&self.orchestrator, self.sink.as_ref(), &self.shutdown, FALLBACK_REPLY).await {
                Ok(()) => {
                    tracing::debug!("fallback reply spoken");
                    return;
                }
                Err(Error::Cancelled) => return,
                Err(e) => tracing::warn!(error = %e, "could not speak fallback reply"),
            }
        }
        self.states.transition(PipelineState::Error);
    }

    fn resume_listening(&mut self) {
        self.gate.reset_window();
        if self.flush_after_turn {
            let flushed = self.queue.clear();
            if flushed > 0 {
                tracing::debug!(frames = flushed, "discarded audio queued during turn");
            }
        }
        self.states.transition(PipelineState::ListeningForWake);
    }
}

/// Synthesize and play one reply
async fn say(
    orchestrator: &Orchestrator,
    sink: &dyn AudioSink,
    shutdown: &Shutdown,
    text: &str,
) -> crate::Result<()> {
    let audio = orchestrator.synthesize(text).await?;
    with_deadline("playback", PLAYBACK_LIMIT, shutdown, sink.play(&audio)).await
}
