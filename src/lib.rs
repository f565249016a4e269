//! # Live Audio Core
//!
//! Real-time audio plumbing for a live voice conversation: microphone capture
//! to PCM16 wire chunks, gapless scheduling of incoming PCM16 replies with
//! barge-in, and frequency snapshots of both signals for visualization.
//!
//! ## Module Layout:
//! - **audio**: Codecs, capture, playback scheduling, engine boundary, analysers
//! - **session**: Live session wire messages and the session collaborator traits
//! - **live**: Controller and event loop tying everything together
//! - **events**: Messages the event loop consumes
//! - **config**: Layered configuration (defaults, config.toml, APP_ variables)
//! - **error**: Error taxonomy

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod live;
pub mod session;

pub use config::AppConfig;
pub use error::{AudioError, AudioResult};
pub use events::{AudioEvent, Command};
pub use live::{LiveAudio, StreamStats};
