//! # Live Audio Core - Loopback Driver
//!
//! Runs the full pipeline offline: a tone generator or a WAV file stands in
//! for the microphone, a loopback session echoes every captured chunk back as
//! playback, and a simulated engine plays it on a virtual clock that follows
//! wall time.
//!
//! ## Tasks:
//! - **Capture ticker**: one `CaptureTick` per 256-sample block (16 ms at 16 kHz)
//! - **Render ticker**: advances the engine clock by the real elapsed time
//! - **Analyser ticker**: refreshes the spectrum snapshots (`analyser_fps`)
//! - **Signals**: SIGTERM / SIGINT request a shutdown
//!
//! The event loop itself runs on the main task and owns all audio state.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Tickers and signal handlers are spawned tokio tasks
//! - **mpsc channels**: Every task talks to the loop by sending an `AudioEvent`
//! - **Box<dyn Trait>**: The microphone is picked at runtime (tone or WAV file)
//! - **Drop of the last sender**: Ends `run()` once every producer is gone

use anyhow::Result;                  // Better error handling with context
use futures_util::StreamExt;         // `.next()` on interval streams
use live_audio_core::audio::{CaptureDevice, SignalBus, SimulatedEngine, ToneDevice, WavFileDevice};
use live_audio_core::session::LoopbackConnector;  // Offline stand-in for the live model
use live_audio_core::{AppConfig, AudioEvent, Command, LiveAudio};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::wrappers::IntervalStream;  // Turns tokio intervals into streams
use tracing::{info, warn};           // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// Application entry point.
///
/// ## What this does:
/// 1. Loads `.env`, sets up logging, loads and validates configuration
/// 2. Picks the microphone stand-in and opens a loopback session
/// 3. Starts the tickers and signal handlers, then runs the event loop
/// 4. Logs the final stream statistics as JSON
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting live-audio-core v{}", env!("CARGO_PKG_VERSION"));
    info!(
        capture_rate = config.capture.sample_rate,
        playback_rate = config.playback.sample_rate,
        duration_secs = config.demo.duration_secs,
        "Configuration loaded"
    );

    let device: Box<dyn CaptureDevice> = match &config.demo.input_wav {
        Some(path) => {
            info!(path = %path, "Using WAV file as microphone");
            Box::new(WavFileDevice::new(path))
        }
        None => {
            info!(tone_hz = config.demo.tone_hz, "Using synthetic tone as microphone");
            Box::new(ToneDevice::new(config.demo.tone_hz))
        }
    };

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = SimulatedEngine::new(config.playback.sample_rate, SignalBus::new("output"));
    let connector = LoopbackConnector::new(config.demo.interrupt_every);
    let mut live = LiveAudio::new(config.clone(), engine, device, connector, tx.clone());

    if !live.open_session() {
        warn!(error = %live.error(), "Continuing without a live session");
    }

    spawn_tickers(&config, &tx);
    setup_signal_handlers(tx.clone());

    let stop_after = Duration::from_secs(config.demo.duration_secs);
    let timer = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(stop_after).await;
        info!("Recording time elapsed");
        let _ = timer.send(Command::StopRecording.into());
        // Let queued playback drain before exiting
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = timer.send(Command::Shutdown.into());
    });

    tx.send(Command::StartRecording.into())?;
    drop(tx);

    let stats = live.run(rx).await;
    info!(
        uptime_seconds = stats.uptime_seconds(),
        stats = %serde_json::to_string(&stats)?,
        "Stream finished"
    );
    Ok(())
}

/// Initialize tracing with `RUST_LOG`, defaulting to debug output for this crate.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_audio_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodic event sources. Each stops once the event loop has gone away.
fn spawn_tickers(config: &AppConfig, tx: &UnboundedSender<AudioEvent>) {
    let block = Duration::from_secs_f64(config.capture.block_duration_secs());
    let capture = tx.clone();
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(block));
        while ticks.next().await.is_some() {
            if capture.send(AudioEvent::CaptureTick).is_err() {
                break;
            }
        }
    });

    let render = tx.clone();
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(Duration::from_millis(10)));
        let mut last = Instant::now();
        while let Some(tick) = ticks.next().await {
            let now = tick.into_std();
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            last = now;
            if render.send(AudioEvent::RenderTick(elapsed)).is_err() {
                break;
            }
        }
    });

    let frame = Duration::from_secs_f64(1.0 / config.demo.analyser_fps as f64);
    let analyser = tx.clone();
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(frame));
        while ticks.next().await.is_some() {
            if analyser.send(AudioEvent::AnalyserTick).is_err() {
                break;
            }
        }
    });
}

/// Turn SIGTERM / SIGINT into a shutdown command.
fn setup_signal_handlers(tx: UnboundedSender<AudioEvent>) {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()),
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        let _ = tx.send(Command::Shutdown.into());
    });
}
