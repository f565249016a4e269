//! # Live Audio Controller
//!
//! Ties capture, the live session, playback scheduling and the analysers
//! together behind one event loop.
//!
//! ## Event Handling:
//! - **CaptureTick**: pull one block from the microphone and forward it upstream
//! - **SessionMessage**: handle `interrupted` first, then schedule the inline audio
//! - **RenderTick / SourceEnded**: advance the engine and release finished sources
//! - **AnalyserTick**: refresh the input and output spectrum snapshots
//! - **Command**: start/stop recording, reset the session, barge in, shut down
//!
//! Every event is handled to completion before the next is read, so the
//! scheduler is only ever mutated from one place at a time.

use crate::audio::analyser::{Analyser, FftAnalyserNode};
use crate::audio::capture::{Capture, CaptureDevice};
use crate::audio::engine::AudioEngine;
use crate::audio::pcm::AudioChunk;
use crate::audio::scheduler::{PlaybackScheduler, PlaybackState, SourceHandle};
use crate::config::AppConfig;
use crate::events::{AudioEvent, Command};
use crate::session::{LiveSession, RealtimeInput, ServerMessage, SessionConnector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Counters collected over the lifetime of a controller.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub started_at: DateTime<Utc>,
    pub sessions_opened: u32,
    pub chunks_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
    pub chunks_received: u64,
    /// Incoming messages or chunks that could not be decoded or scheduled
    pub chunks_dropped: u64,
    pub interrupts: u64,
    pub sources_completed: u64,
    pub stale_completions: u64,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            sessions_opened: 0,
            chunks_sent: 0,
            send_failures: 0,
            messages_received: 0,
            chunks_received: 0,
            chunks_dropped: 0,
            interrupts: 0,
            sources_completed: 0,
            stale_completions: 0,
        }
    }
}

impl StreamStats {
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// Controller for one live audio conversation.
pub struct LiveAudio<E, D, C>
where
    E: AudioEngine,
    D: CaptureDevice,
    C: SessionConnector,
{
    config: AppConfig,
    capture: Capture<D>,
    scheduler: PlaybackScheduler<E>,
    connector: C,
    session: Option<C::Session>,
    events: UnboundedSender<AudioEvent>,
    input_analyser: Analyser<FftAnalyserNode>,
    output_analyser: Analyser<FftAnalyserNode>,
    status: String,
    error: String,
    stats: StreamStats,
}

impl<E, D, C> LiveAudio<E, D, C>
where
    E: AudioEngine,
    D: CaptureDevice,
    C: SessionConnector,
{
    /// Build the controller. `events` is handed to every session the
    /// connector opens, so replies come back into the same loop.
    pub fn new(
        config: AppConfig,
        engine: E,
        device: D,
        connector: C,
        events: UnboundedSender<AudioEvent>,
    ) -> Self {
        let capture = Capture::new(device, config.capture.clone());
        let input_analyser = Analyser::with_config(capture.input_node(), &config.analyser);
        let output_analyser = Analyser::with_config(&engine.output_node(), &config.analyser);

        Self {
            config,
            capture,
            scheduler: PlaybackScheduler::new(engine),
            connector,
            session: None,
            events,
            input_analyser,
            output_analyser,
            status: String::new(),
            error: String::new(),
            stats: StreamStats::default(),
        }
    }

    /// Open a session through the connector. Failure is reported in the
    /// error text and leaves the controller without a session.
    pub fn open_session(&mut self) -> bool {
        match self.connector.connect(self.events.clone()) {
            Ok(session) => {
                info!(session_id = %session.id(), "Live session opened");
                self.session = Some(session);
                self.stats.sessions_opened += 1;
                self.update_status("Opened");
                true
            }
            Err(err) => {
                error!(error = %err, "Failed to open live session");
                self.update_error(err.to_string());
                false
            }
        }
    }

    /// Handle one event. Returns `false` once the loop should exit.
    pub fn handle(&mut self, event: AudioEvent) -> bool {
        match event {
            AudioEvent::SessionMessage(text) => self.on_session_message(&text),
            AudioEvent::SessionClosed { session_id, reason } => {
                self.on_session_closed(&session_id, &reason)
            }
            AudioEvent::SourceEnded(handle) => self.on_source_ended(handle),
            AudioEvent::CaptureTick => self.on_capture_tick(),
            AudioEvent::RenderTick(elapsed) => self.on_render_tick(elapsed),
            AudioEvent::AnalyserTick => self.on_analyser_tick(),
            AudioEvent::Command(command) => return self.on_command(command),
        }
        true
    }

    /// Drive the controller until a shutdown command arrives or every sender
    /// is gone, then release capture, playback and the session.
    pub async fn run(mut self, mut events: UnboundedReceiver<AudioEvent>) -> StreamStats {
        info!("Live audio event loop started");
        while let Some(event) = events.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        self.shutdown();
        info!(
            chunks_sent = self.stats.chunks_sent,
            chunks_received = self.stats.chunks_received,
            chunks_dropped = self.stats.chunks_dropped,
            interrupts = self.stats.interrupts,
            "Live audio event loop finished"
        );
        self.stats
    }

    pub fn start_recording(&mut self) {
        if self.capture.is_recording() {
            return;
        }
        if self.session.is_none() {
            self.update_status("Live session not ready.");
            return;
        }

        let result = self.capture.start();
        self.update_status(self.capture.status_text().to_string());
        if let Err(err) = result {
            warn!(error = %err, "Recording did not start");
        }
    }

    pub fn stop_recording(&mut self) {
        self.capture.stop();
        self.update_status(self.capture.status_text().to_string());
    }

    /// Barge in locally: drop every queued and playing source.
    pub fn interrupt(&mut self) {
        let stopped = self.scheduler.interrupt();
        self.stats.interrupts += 1;
        debug!(stopped, "Interrupt handled");
    }

    /// Close the session, clear playback and open a fresh session.
    /// Ignored while recording.
    pub fn reset(&mut self) {
        if self.capture.is_recording() {
            debug!("Reset ignored while recording");
            return;
        }

        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.scheduler.reset();
        self.open_session();
        self.update_status("Session cleared.");
    }

    fn shutdown(&mut self) {
        self.capture.stop();
        self.scheduler.interrupt();
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    fn on_command(&mut self, command: Command) -> bool {
        debug!(%command, "Command received");
        match command {
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::Reset => self.reset(),
            Command::Interrupt => self.interrupt(),
            Command::Shutdown => return false,
        }
        true
    }

    fn on_capture_tick(&mut self) {
        if !self.capture.is_recording() {
            return;
        }

        let blob = self.capture.process_tick();
        if !self.capture.is_recording() {
            // The device failed or ran dry during this tick
            self.update_status(self.capture.status_text().to_string());
        }

        let (Some(media), Some(session)) = (blob, self.session.as_mut()) else {
            return;
        };
        match session.send_realtime_input(RealtimeInput { media }) {
            Ok(()) => self.stats.chunks_sent += 1,
            Err(err) => {
                self.stats.send_failures += 1;
                warn!(error = %err, "Failed to send captured chunk");
                self.update_error(err.to_string());
            }
        }
    }

    fn on_session_message(&mut self, text: &str) {
        self.stats.messages_received += 1;
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                self.stats.chunks_dropped += 1;
                warn!(error = %err, "Dropping malformed session message");
                return;
            }
        };

        // Stale playback goes before anything in this message is scheduled
        if message.interrupted() {
            self.interrupt();
        }

        let Some(blob) = message.audio() else {
            return;
        };
        self.stats.chunks_received += 1;

        let playback = &self.config.playback;
        if let Some(declared) = blob.declared_rate().filter(|&rate| rate != playback.sample_rate) {
            debug!(declared, playback_rate = playback.sample_rate, "Ignoring declared chunk rate");
        }
        let chunk = match AudioChunk::from_blob(blob, playback.sample_rate, playback.channels) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.stats.chunks_dropped += 1;
                warn!(error = %err, "Dropping undecodable audio chunk");
                return;
            }
        };

        if self.scheduler.schedule(chunk).is_none() {
            self.stats.chunks_dropped += 1;
        }
    }

    fn on_session_closed(&mut self, session_id: &str, reason: &str) {
        let current = self.session.as_ref().map(|s| s.id() == session_id);
        if current != Some(true) {
            debug!(session_id, "Ignoring close of a previous session");
            return;
        }

        info!(session_id, reason, "Live session closed");
        self.session = None;
        self.update_status(format!("Close:{}", reason));
    }

    fn on_source_ended(&mut self, handle: SourceHandle) {
        if self.scheduler.on_source_ended(handle) {
            self.stats.sources_completed += 1;
        } else {
            self.stats.stale_completions += 1;
        }
    }

    fn on_render_tick(&mut self, elapsed: f64) {
        for handle in self.scheduler.engine_mut().render(elapsed) {
            self.on_source_ended(handle);
        }
    }

    fn on_analyser_tick(&mut self) {
        self.input_analyser.update();
        self.output_analyser.update();
    }

    fn update_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        info!(status = %self.status, "Status");
    }

    fn update_error(&mut self, message: impl Into<String>) {
        self.error = message.into();
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<E> {
        &self.scheduler
    }

    pub fn capture(&self) -> &Capture<D> {
        &self.capture
    }

    pub fn session(&self) -> Option<&C::Session> {
        self.session.as_ref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Latest microphone spectrum.
    pub fn input_data(&self) -> &[u8] {
        self.input_analyser.data()
    }

    /// Latest playback spectrum.
    pub fn output_data(&self) -> &[u8] {
        self.output_analyser.data()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}
