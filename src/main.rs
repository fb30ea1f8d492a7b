use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use capri_voice::conversation::ConversationContext;
use capri_voice::daemon::{Daemon, Mode};
use capri_voice::modules::home_control::DeviceRegistry;
use capri_voice::pipeline::StateMachine;
use capri_voice::voice::{AudioCapture, AudioPlayback, FrameQueue, rms};
use capri_voice::Config;

/// Capri - local voice assistant
#[derive(Parser)]
#[command(name = "capri", version, about)]
struct Cli {
    /// Input mode
    #[arg(long, env = "CAPRI_MODE", value_enum, default_value_t = Mode::Voice)]
    mode: Mode,

    /// Port for the HTTP API (api mode)
    #[arg(long, env = "CAPRI_PORT")]
    port: Option<u16>,

    /// Wake word to listen for
    #[arg(long, env = "CAPRI_WAKE_WORD")]
    wake_word: Option<String>,

    /// Path to the config file
    #[arg(short, long, env = "CAPRI_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// List configured devices
    Devices,
    /// Run one text command through the assistant
    Ask {
        /// What to say, e.g. "turn on the bedroom light"
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,capri_voice=info",
        1 => "info,capri_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?.with_wake_word(cli.wake_word);
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Devices => list_devices(&config).await,
            Command::Ask { text } => ask(config, &text).await,
        };
    }

    tracing::info!(mode = %cli.mode, wake_word = %config.wake.word, "starting capri");

    let daemon = Daemon::new(config).await?;
    daemon.run(cli.mode).await?;

    Ok(())
}

/// Print input levels for a few seconds
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let queue = std::sync::Arc::new(FrameQueue::new(config.audio.queue_frames));
    let mut capture = AudioCapture::new(&config.audio, std::sync::Arc::clone(&queue))?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Some(frame) = queue.try_pop() {
            samples.extend_from_slice(frame.samples());
        }
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");
    println!("If RMS stayed near 0, check the default input device and its levels.");

    Ok(())
}

/// Play a short sine tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    playback.play_samples(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");

    Ok(())
}

/// Print the device registry
async fn list_devices(config: &Config) -> anyhow::Result<()> {
    let registry = DeviceRegistry::load(&config.home.registry_path)?;
    let devices = registry.snapshot().await;

    println!("Registry: {}", config.home.registry_path.display());
    if devices.is_empty() {
        println!("No devices configured.");
        return Ok(());
    }

    for device in devices {
        let summary = device.summary();
        println!(
            "{:<20} {:<24} {:<11} {:<5} {}",
            summary.id,
            summary.name,
            summary.device_type,
            summary.protocol.to_string(),
            summary.status
        );
    }

    Ok(())
}

/// Route one command and print the reply
async fn ask(config: Config, text: &str) -> anyhow::Result<()> {
    let max_turns = config.conversation.max_turns;
    let daemon = Daemon::new(config).await?;

    let mut context = ConversationContext::new(max_turns);
    let mut states = StateMachine::new();
    let outcome = daemon
        .orchestrator()
        .respond(&mut context, text, &mut states)
        .await;

    if let Some(module) = &outcome.routing.module_id {
        println!("[{module}]");
    }
    println!("{}", outcome.reply);
    if let Some(error) = outcome.error {
        tracing::warn!(error = %error, "turn fell back");
    }

    Ok(())
}
