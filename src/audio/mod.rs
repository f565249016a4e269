//! # Audio Module
//!
//! Everything between the microphone and the speaker, with the live session
//! kept outside:
//!
//! ## Key Components:
//! - **Transcoder**: Standard padded base64 for PCM payloads
//! - **PCM**: Float ↔ PCM16 LE conversion, deinterleaving, wire blobs
//! - **Capture**: Microphone state machine emitting 256-sample blocks
//! - **Scheduler**: Gapless playback queue with barge-in support
//! - **Analyser**: Frequency snapshots of the input and output signals
//! - **Engine**: Capability trait over the audio backend, plus a simulated one
//!
//! ## Audio Formats:
//! - **Capture**: 16 kHz, mono, 16-bit PCM little-endian (`audio/pcm;rate=16000`)
//! - **Playback**: 24 kHz, mono by default, 16-bit PCM little-endian

pub mod analyser;
pub mod capture;
pub mod devices;
pub mod engine;
pub mod pcm;
pub mod scheduler;
pub mod signal;
pub mod transcoder;

pub use analyser::{Analyser, AnalyserNode, FftAnalyserNode, SignalNode};
pub use capture::{Capture, CaptureDevice, CaptureStatus};
pub use devices::{ToneDevice, WavFileDevice};
pub use engine::{AudioBuffer, AudioEngine, SimulatedEngine};
pub use pcm::{AudioChunk, MediaBlob};
pub use scheduler::{PlaybackScheduler, PlaybackState, SourceHandle};
pub use signal::{SampleTap, SignalBus};
