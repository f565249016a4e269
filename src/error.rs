//! # Error Handling
//!
//! Error taxonomy for the streaming core. None of these errors is fatal to the
//! process: every failure path hands control back with the pipeline in a
//! well-defined Idle or Playing state.
//!
//! ## Error Families:
//! - **DecodeError**: Malformed wire text or a byte length that does not fit the
//!   declared channel layout. The offending chunk is dropped.
//! - **CaptureError**: Microphone permission denial or device failure while
//!   starting capture. Capture rolls back to Idle and the status text reports it.
//! - **SchedulingAnomaly**: The chunk decoded but the audio engine could not
//!   turn it into a playing source. Dropped and logged.
//!
//! Interruption (barge-in) is ordinary control flow and has no error variant.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### thiserror derive
//! - **#[error("...")]**: Generates the `Display` impl from a format string
//! - **#[from]**: Generates a `From` impl, so `?` converts the inner error
//!
//! ### Conversion chain
//! - Library errors only enter through their family: `base64::DecodeError` and
//!   `serde_json::Error` become `DecodeError`, `std::io::Error` becomes `CaptureError`
//! - Each family then converts into the umbrella `AudioError`
//!
//! Configuration problems are not audio errors: `AppConfig::load` and
//! `validate` report them through `anyhow` before the pipeline exists.

use thiserror::Error; // Derives Display and From for the enums below

/// Failure to turn wire data back into samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Text is not valid standard base64 (wrong alphabet or bad padding)
    #[error("invalid base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Byte length is not a whole number of 16-bit frames for the channel count
    #[error("PCM16 payload of {len} bytes is not a whole number of {channels}-channel frames")]
    Format { len: usize, channels: usize },

    /// A session frame could not be parsed as a server message
    #[error("malformed session message: {0}")]
    Message(#[from] serde_json::Error),
}

/// Failure to start (or keep) a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user or platform refused microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The device exists but failed to open or deliver samples
    #[error("capture device failure: {0}")]
    Device(String),

    /// The source cannot deliver the fixed capture format (no resampling is done)
    #[error("unsupported capture format: {0}")]
    UnsupportedFormat(String),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The engine could not allocate or start playback for a decoded chunk.
#[derive(Debug, Error)]
pub enum SchedulingAnomaly {
    #[error("engine rejected a {channels}-channel buffer at {sample_rate} Hz: {reason}")]
    BufferRejected {
        channels: usize,
        sample_rate: u32,
        reason: String,
    },

    #[error("engine could not start playback source: {0}")]
    StartFailed(String),
}

/// Umbrella error for the core, with automatic conversion from each family.
///
/// ## Usage Example:
/// ```rust,ignore
/// let channels = chunk.to_channels()?; // DecodeError -> AudioError::Decode
/// ```
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("scheduling anomaly: {0}")]
    Scheduling(#[from] SchedulingAnomaly),

    /// The live session refused a message or is already closed
    #[error("session error: {0}")]
    Session(String),
}

/// Shorthand for `Result<T, AudioError>`.
pub type AudioResult<T> = Result<T, AudioError>;
