use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use checkin_lib::audio::{AudioSink, NullSink, WavFileSink, WavFileSource};
use checkin_lib::effects::TokioEffectRunner;
use checkin_lib::settings::{default_settings_path, get_api_key, load_settings, save_settings};
use checkin_lib::streaming::WebSocketTransport;
use checkin_lib::{start_session, ConnectionState, Notification, SessionParts, StreamingError};

/// Run one voice check-in against the OpenAI Realtime API.
///
/// A WAV file stands in for the microphone; the assistant's spoken replies
/// can be written to another WAV file.
#[derive(Debug, Parser)]
#[command(name = "checkin", version, about)]
struct Args {
    /// Recorded speech to send as microphone input
    input: PathBuf,

    /// Write the assistant's audio here (24kHz mono PCM16)
    #[arg(long)]
    reply_wav: Option<PathBuf>,

    /// Write the completed turns here as JSON
    #[arg(long)]
    transcript_out: Option<PathBuf>,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// End the check-in after this many seconds
    #[arg(long, default_value_t = 120)]
    max_duration: u64,

    /// Write the effective settings back to the settings file before starting
    #[arg(long)]
    save_settings: bool,
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::StatusChanged(status) => log::info!("Status: {}", status),
        Notification::AudioLevel(level) => log::trace!("Mic level: {:.2}", level),
        Notification::AssistantSpeakingStarted => log::info!("Assistant speaking"),
        Notification::UserStartedSpeaking => log::info!("User speaking"),
        Notification::LiveCaption { speaker, text } => {
            log::debug!("[{}] {}", speaker.label(), text)
        }
        Notification::InputTextUpdated(text) => println!("User: {}", text),
        Notification::OutputTextUpdated(text) => println!("AI: {}", text),
        Notification::Error(message) => eprintln!("Error: {}", message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    let args = Args::parse();

    let settings_path = match args.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = load_settings(&settings_path);
    log::info!("Settings loaded from {:?}", settings_path);
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("saving settings to {:?}", settings_path))?;
        log::info!("Settings saved to {:?}", settings_path);
    }

    let api_key = get_api_key().ok_or(StreamingError::MissingApiKey)?;
    let instructions = settings.resolve_instructions()?;

    let microphone = WavFileSource::open(&args.input)?;
    let sink: Box<dyn AudioSink> = match &args.reply_wav {
        Some(path) => Box::new(WavFileSink::create(path)?),
        None => Box::new(NullSink::default()),
    };

    let runner = TokioEffectRunner::new(settings.stage_timeouts())
        .with_microphone(Box::new(microphone))
        .with_capture_interval(settings.capture_interval());

    let (handle, mut notifications, session_task) = start_session(SessionParts {
        request: settings.connect_request(&api_key),
        session_config: settings.session_config(instructions),
        transport: Box::new(WebSocketTransport::new()),
        sink,
        runner: Arc::new(runner),
    });

    if let Err(e) = handle.connect().await {
        handle.shutdown();
        let _ = session_task.await;
        return Err(e).context("Could not start check-in");
    }

    let deadline = tokio::time::sleep(Duration::from_secs(args.max_duration));
    tokio::pin!(deadline);
    let mut ending = false;

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(Notification::StatusChanged(ConnectionState::Idle)) | None => break,
                Some(n) => print_notification(&n),
            },
            _ = tokio::signal::ctrl_c(), if !ending => {
                log::info!("Interrupted, ending check-in");
                handle.disconnect();
                ending = true;
            }
            _ = &mut deadline, if !ending => {
                log::info!("Reached {}s limit, ending check-in", args.max_duration);
                handle.disconnect();
                ending = true;
            }
        }
    }

    match handle.snapshot().await {
        Ok(snapshot) => log::info!("Session stats: {:?}", snapshot.stats),
        Err(e) => log::warn!("No session stats: {}", e),
    }

    handle.shutdown();
    let conversation = session_task.await.context("Session loop panicked")?;

    println!("\n--- Check-in transcript ---\n{}", conversation.transcript());

    if let Some(path) = args.transcript_out {
        let json = serde_json::to_string_pretty(&conversation)?;
        std::fs::write(&path, json).with_context(|| format!("Writing {:?}", path))?;
        log::info!("Transcript written to {:?}", path);
    }

    Ok(())
}
