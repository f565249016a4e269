//! # Configuration Management
//!
//! Loads the streaming configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_PLAYBACK__SAMPLE_RATE, APP_DEMO__INPUT_WAV, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: `#[derive(Serialize, Deserialize)]` lets the `config` crate build
//!   these structs straight from TOML and environment values
//! - **Default impl**: The built-in values are themselves a configuration source
//! - **anyhow::Result**: Config problems are reported with context and end the
//!   program before any audio state exists
//!
//! The capture and playback formats are fixed per direction. They are exposed
//! here so deployments can check them, not so they can be negotiated.

use anyhow::Result;                   // Loading and validation errors with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON and env values

/// Mime type announced on every upstream chunk.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Mime type of downstream playback chunks. Playback is always decoded at
/// this rate, whatever an incoming blob declares.
pub const PLAYBACK_MIME_TYPE: &str = "audio/pcm;rate=24000";

/// Complete configuration for the streaming core and the demo driver.
///
/// ## Rust Concepts:
/// - **Nested structs**: Each section maps to a `[table]` in config.toml
/// - **Clone**: The controller keeps its own copy while `main` keeps reading
///   the demo section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub analyser: AnalyserConfig,
    pub demo: DemoConfig,
}

/// Microphone capture format.
///
/// ## Fields:
/// - `sample_rate`: Capture rate in Hz (16000 for the live session)
/// - `block_size`: Samples delivered per processing callback (256)
/// - `channels`: Capture is always mono
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: u16,
}

impl CaptureConfig {
    /// Duration of one capture block in seconds.
    pub fn block_duration_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}

/// Format of incoming playback audio.
///
/// ## Fields:
/// - `sample_rate`: Every incoming chunk is played at this rate (24000)
/// - `channels`: Interleaved channel count of incoming PCM16
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Frequency analyser tuning.
///
/// ## Fields:
/// - `fft_size`: Transform size; bin count is half of it
/// - `min_decibels` / `max_decibels`: Range mapped onto byte values 0..=255
/// - `smoothing_time_constant`: Averaging between successive snapshots (0 = none)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    pub fft_size: usize,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub smoothing_time_constant: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 32,
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing_time_constant: 0.8,
        }
    }
}

/// Settings for the loopback demo binary.
///
/// ## Fields:
/// - `input_wav`: Optional 16 kHz mono WAV file used as the microphone
/// - `tone_hz`: Frequency of the synthetic tone used when no WAV file is set
/// - `duration_secs`: How long to record before stopping
/// - `interrupt_every`: Loopback signals barge-in every N replies (0 disables)
/// - `analyser_fps`: Rate of analyser snapshot ticks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    pub input_wav: Option<String>,
    pub tone_hz: f32,
    pub duration_secs: u64,
    pub interrupt_every: u32,
    pub analyser_fps: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                sample_rate: 16000,
                block_size: 256,
                channels: 1,
            },
            playback: PlaybackConfig {
                sample_rate: 24000,
                channels: 1,
            },
            analyser: AnalyserConfig::default(),
            demo: DemoConfig {
                input_wav: None,
                tone_hz: 440.0,
                duration_secs: 10,
                interrupt_every: 0,
                analyser_fps: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and `APP_*` variables.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_DEMO__DURATION_SECS=30`: Record for thirty seconds
    /// - `APP_DEMO__INTERRUPT_EVERY=8`: Barge in on every eighth loopback reply
    ///
    /// Sections and fields are separated by a double underscore because field
    /// names themselves contain single underscores.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Sample rates and the capture block size are non-zero
    /// - Capture is mono and playback has at least one channel
    /// - FFT size is a power of two in `[32, 32768]`
    /// - The decibel range is non-empty and smoothing lies in `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.capture.block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.capture.channels != 1 {
            return Err(anyhow::anyhow!(
                "Capture must be mono, got {} channels",
                self.capture.channels
            ));
        }

        if self.playback.channels == 0 {
            return Err(anyhow::anyhow!("Playback needs at least one channel"));
        }

        let fft_size = self.analyser.fft_size;
        if !fft_size.is_power_of_two() || !(32..=32768).contains(&fft_size) {
            return Err(anyhow::anyhow!(
                "FFT size must be a power of two between 32 and 32768, got {}",
                fft_size
            ));
        }

        if self.analyser.min_decibels >= self.analyser.max_decibels {
            return Err(anyhow::anyhow!("min_decibels must be below max_decibels"));
        }

        if !(0.0..=1.0).contains(&self.analyser.smoothing_time_constant) {
            return Err(anyhow::anyhow!("Smoothing time constant must be within [0, 1]"));
        }

        if self.demo.analyser_fps == 0 {
            return Err(anyhow::anyhow!("Analyser tick rate must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update, then re-validate.
    ///
    /// Only fields present in the JSON are changed, so
    /// `{"demo": {"interrupt_every": 4}}` leaves every other value alone.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(analyser) = partial.get("analyser") {
            if let Some(size) = analyser.get("fft_size").and_then(|v| v.as_u64()) {
                self.analyser.fft_size = size as usize;
            }
            if let Some(min) = analyser.get("min_decibels").and_then(|v| v.as_f64()) {
                self.analyser.min_decibels = min as f32;
            }
            if let Some(max) = analyser.get("max_decibels").and_then(|v| v.as_f64()) {
                self.analyser.max_decibels = max as f32;
            }
            if let Some(tau) = analyser.get("smoothing_time_constant").and_then(|v| v.as_f64()) {
                self.analyser.smoothing_time_constant = tau as f32;
            }
        }

        if let Some(demo) = partial.get("demo") {
            if let Some(path) = demo.get("input_wav") {
                self.demo.input_wav = path.as_str().map(str::to_string);
            }
            if let Some(hz) = demo.get("tone_hz").and_then(|v| v.as_f64()) {
                self.demo.tone_hz = hz as f32;
            }
            if let Some(secs) = demo.get("duration_secs").and_then(|v| v.as_u64()) {
                self.demo.duration_secs = secs;
            }
            if let Some(every) = demo.get("interrupt_every").and_then(|v| v.as_u64()) {
                self.demo.interrupt_every = every as u32;
            }
            if let Some(fps) = demo.get("analyser_fps").and_then(|v| v.as_u64()) {
                self.demo.analyser_fps = fps as u32;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.capture.block_size, 256);
        assert_eq!(config.playback.sample_rate, 24000);
        assert_eq!(config.analyser.fft_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_duration() {
        let config = AppConfig::default();
        assert!((config.capture.block_duration_secs() - 0.016).abs() < 1e-9);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.analyser.fft_size = 48;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analyser.min_decibels = -20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"demo": {"interrupt_every": 4, "input_wav": "mic.wav"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.demo.interrupt_every, 4);
        assert_eq!(config.demo.input_wav.as_deref(), Some("mic.wav"));
        // Untouched sections keep their values
        assert_eq!(config.analyser, AnalyserConfig::default());
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"analyser": {"fft_size": 100}}"#).is_err());
    }
}
