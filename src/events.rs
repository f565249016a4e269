//! # Event Loop Messages
//!
//! Everything that reaches the live controller arrives as an `AudioEvent` on
//! one channel and is handled to completion before the next one is read.

use crate::audio::scheduler::SourceHandle;
use std::fmt;

/// User-level commands, one per control button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    /// Close and reopen the session and drop queued playback
    Reset,
    /// Barge in locally
    Interrupt,
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::StartRecording => "start_recording",
            Command::StopRecording => "stop_recording",
            Command::Reset => "reset",
            Command::Interrupt => "interrupt",
            Command::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// One unit of work for the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Raw JSON frame from the live session
    SessionMessage(String),
    /// A session closed; ignored unless it is the current one
    SessionClosed { session_id: String, reason: String },
    /// The engine reports a playback source finished or was stopped
    SourceEnded(SourceHandle),
    /// Capture processing callback
    CaptureTick,
    /// Advance the engine clock by this many seconds
    RenderTick(f64),
    /// Refresh both analyser snapshots
    AnalyserTick,
    Command(Command),
}

impl From<Command> for AudioEvent {
    fn from(command: Command) -> Self {
        AudioEvent::Command(command)
    }
}
