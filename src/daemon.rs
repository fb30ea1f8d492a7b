//! Daemon - wires configuration into a running assistant
//!
//! Voice mode captures from the microphone and speaks replies. API mode
//! serves the same text chain over HTTP. Both stop on Ctrl-C.

use std::sync::Arc;

use crate::api::{ApiServer, ApiState};
use crate::conversation::{ConversationContext, ConversationStore};
use crate::llm::ChatCompletionGenerator;
use crate::modules::home_control::DeviceRegistry;
use crate::modules::{HomeControlModule, ModuleRegistry};
use crate::pipeline::{Orchestrator, Shutdown, ShutdownTrigger, StageTimeouts, VoiceSession};
use crate::voice::{
    AudioCapture, AudioPlayback, EnergyClassifier, FrameQueue, SpeechSynthesizer,
    UtteranceCollector, WakeGate, WhisperTranscriber,
};
use crate::{Config, Result};

/// How the assistant takes input
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Microphone in, speaker out
    Voice,
    /// HTTP endpoints only
    Api,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => f.write_str("voice"),
            Self::Api => f.write_str("api"),
        }
    }
}

/// The Capri daemon
pub struct Daemon {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    home: Option<Arc<HomeControlModule>>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("orchestrator", &self.orchestrator)
            .field("home", &self.home.is_some())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Build adapters, modules and the orchestrator from `config`
    ///
    /// # Errors
    ///
    /// Returns error if an adapter cannot be created or the device registry
    /// is malformed
    pub async fn new(config: Config) -> Result<Self> {
        let (trigger, shutdown) = Shutdown::channel();

        let mut modules = ModuleRegistry::new();
        let home = if config.home.enabled {
            let registry = Arc::new(DeviceRegistry::load(&config.home.registry_path)?);
            tracing::info!(
                path = %config.home.registry_path.display(),
                devices = registry.len().await,
                "device registry loaded"
            );
            let module = Arc::new(HomeControlModule::new(registry, &config.home)?);
            modules.register(module.clone())?;
            Some(module)
        } else {
            tracing::info!("home control disabled");
            None
        };

        let generator = Arc::new(ChatCompletionGenerator::new(&config.llm)?);
        let transcriber = Arc::new(WhisperTranscriber::new(&config.stt)?);
        let speaker = Arc::new(SpeechSynthesizer::new(&config.tts)?);

        let timeouts = StageTimeouts {
            stt: config.stt.timeout,
            llm: config.llm.timeout,
            tts: config.tts.timeout,
            ..StageTimeouts::default()
        };

        let mut orchestrator = Orchestrator::new(
            Arc::new(modules),
            generator.clone(),
            transcriber,
            speaker,
        )
        .timeouts(timeouts)
        .wake_word(config.wake.word.clone())
        .shutdown(shutdown.clone());

        if config.llm.intent_fallback {
            orchestrator = orchestrator.intent_extractor(generator);
        }

        tracing::debug!(
            llm = %config.llm.base_url,
            stt = %config.stt.base_url,
            tts = %config.tts.base_url,
            "adapters configured"
        );

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            home,
            trigger,
            shutdown,
        })
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub const fn home(&self) -> Option<&Arc<HomeControlModule>> {
        self.home.as_ref()
    }

    /// Run in `mode` until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if audio devices or the API listener cannot be opened
    #[allow(clippy::future_not_send)]
    pub async fn run(self, mode: Mode) -> Result<()> {
        let Self {
            config,
            orchestrator,
            home,
            trigger,
            shutdown,
        } = self;

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            trigger.trigger();
        });

        tracing::info!(mode = %mode, wake_word = %config.wake.word, "capri running");

        match mode {
            Mode::Api => {
                let conversations = ConversationStore::new(
                    config.conversation.max_contexts,
                    config.conversation.max_turns,
                );
                let state = Arc::new(ApiState::new(orchestrator, conversations, home));
                ApiServer::new(state, &config.api).run(shutdown).await
            }
            Mode::Voice => run_voice(&config, orchestrator, shutdown).await,
        }
    }
}

/// Capture stays on this task; the session loop runs on its own
#[allow(clippy::future_not_send)]
async fn run_voice(config: &Config, orchestrator: Arc<Orchestrator>, shutdown: Shutdown) -> Result<()> {
    let queue = Arc::new(FrameQueue::new(config.audio.queue_frames));
    let mut capture = AudioCapture::new(&config.audio, Arc::clone(&queue))?;
    let sink = Arc::new(AudioPlayback::new()?);

    let gate = WakeGate::new(Box::new(EnergyClassifier::default()), &config.wake);
    let collector = UtteranceCollector::new(config.utterance.clone());
    let context = ConversationContext::new(config.conversation.max_turns);

    let mut session = VoiceSession::new(orchestrator, queue, gate, collector, sink, context)
        .shutdown(shutdown.clone())
        .flush_after_turn(config.audio.flush_after_turn);

    capture.start()?;
    tracing::info!("capri ready - say \"{}\"", config.wake.word);

    let mut handle = tokio::spawn(async move {
        session.run().await;
        session.context().len()
    });

    let turns = tokio::select! {
        () = shutdown.wait() => {
            capture.stop();
            (&mut handle).await
        }
        turns = &mut handle => {
            capture.stop();
            turns
        }
    };

    match turns {
        Ok(turns) => tracing::info!(turns, "voice session ended"),
        Err(e) => tracing::error!(error = %e, "voice session task failed"),
    }
    Ok(())
}
