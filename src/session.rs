//! # Live Session Protocol
//!
//! Message types exchanged with the live conversation session and the
//! collaborator traits the controller talks through.
//!
//! ## Message Flow:
//! ```text
//! Capture ──RealtimeInput──► LiveSession
//! LiveSession ──AudioEvent::SessionMessage(JSON)──► event loop ──► ServerMessage
//! ```
//!
//! ## Incoming Frame Example:
//! ```json
//! {"serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "..."}}]}, "interrupted": true}}
//! ```
//!
//! `LoopbackConnector` stands in for a remote model: it answers every captured
//! chunk with the same PCM, which keeps the whole pipeline runnable offline.
//! Replies are labelled with the fixed playback format, so the echo plays at
//! 24 kHz (higher pitched and faster than it was captured).

use crate::audio::pcm::MediaBlob;
use crate::config::PLAYBACK_MIME_TYPE;
use crate::error::{AudioError, AudioResult, DecodeError};
use crate::events::AudioEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

/// Top-level frame received from the live session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,

    /// Set when the user barged in and queued playback is stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

impl ServerMessage {
    /// Parse one JSON frame.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Frame carrying one audio part.
    pub fn audio_reply(media: MediaBlob) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        inline_data: Some(media),
                    }],
                }),
                interrupted: None,
            }),
        }
    }

    /// Frame signalling an interruption and nothing else.
    pub fn interruption() -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: None,
                interrupted: Some(true),
            }),
        }
    }

    /// Inline audio of the first part. Later parts are not audio.
    pub fn audio(&self) -> Option<&MediaBlob> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
    }

    pub fn interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|content| content.interrupted)
            .unwrap_or(false)
    }
}

/// Upstream message wrapping one captured chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

/// An open live conversation.
pub trait LiveSession {
    fn id(&self) -> &str;

    /// Forward one captured chunk.
    fn send_realtime_input(&mut self, input: RealtimeInput) -> AudioResult<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);
}

/// Opens live sessions that report back through the event channel.
pub trait SessionConnector {
    type Session: LiveSession;

    fn connect(&mut self, events: UnboundedSender<AudioEvent>) -> AudioResult<Self::Session>;
}

/// Connector for sessions that echo captured audio back as replies.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    interrupt_every: u32,
}

impl LoopbackConnector {
    /// `interrupt_every` of N makes every Nth reply start with an
    /// interruption frame. Zero disables interruptions.
    pub fn new(interrupt_every: u32) -> Self {
        Self { interrupt_every }
    }
}

impl SessionConnector for LoopbackConnector {
    type Session = LoopbackSession;

    fn connect(&mut self, events: UnboundedSender<AudioEvent>) -> AudioResult<LoopbackSession> {
        let session = LoopbackSession {
            id: Uuid::new_v4().to_string(),
            events,
            interrupt_every: self.interrupt_every,
            replies: 0,
            closed: false,
        };
        info!(session_id = %session.id, "Loopback session opened");
        Ok(session)
    }
}

/// Session answering each chunk with the same audio.
#[derive(Debug)]
pub struct LoopbackSession {
    id: String,
    events: UnboundedSender<AudioEvent>,
    interrupt_every: u32,
    replies: u64,
    closed: bool,
}

impl LoopbackSession {
    pub fn replies(&self) -> u64 {
        self.replies
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn deliver(&self, message: &ServerMessage) -> AudioResult<()> {
        let text = serde_json::to_string(message).map_err(DecodeError::from)?;
        self.events
            .send(AudioEvent::SessionMessage(text))
            .map_err(|_| AudioError::Session("event loop has shut down".to_string()))
    }
}

impl LiveSession for LoopbackSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_realtime_input(&mut self, input: RealtimeInput) -> AudioResult<()> {
        if self.closed {
            return Err(AudioError::Session(format!("session {} is closed", self.id)));
        }

        self.replies += 1;
        let n = self.interrupt_every as u64;
        if n > 0 && self.replies % n == 0 {
            debug!(session_id = %self.id, reply = self.replies, "Loopback barge-in");
            self.deliver(&ServerMessage::interruption())?;
        }
        self.deliver(&ServerMessage::audio_reply(MediaBlob {
            mime_type: PLAYBACK_MIME_TYPE.to_string(),
            data: input.media.data,
        }))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(session_id = %self.id, replies = self.replies, "Loopback session closed");
        // The loop may already be gone during shutdown
        let _ = self.events.send(AudioEvent::SessionClosed {
            session_id: self.id.clone(),
            reason: "closed by client".to_string(),
        });
    }
}
