//! # Capture Devices
//!
//! Concrete `CaptureDevice` sources for running the pipeline without a
//! browser microphone:
//! - **ToneDevice**: synthetic sine tone with slow amplitude modulation
//! - **WavFileDevice**: samples read from a WAV file already in the capture format
//!
//! Neither device resamples. A WAV file must already be 16 kHz mono.

use crate::audio::capture::CaptureDevice;
use crate::error::CaptureError;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::PathBuf;
use tracing::{debug, info};
use wav::BitDepth;

/// Sine tone generator.
#[derive(Debug, Clone)]
pub struct ToneDevice {
    frequency: f64,
    amplitude: f64,
    sample_rate: u32,
    position: u64,
    limit: Option<u64>,
    open: bool,
}

impl ToneDevice {
    /// Endless tone at `frequency` Hz.
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency as f64,
            amplitude: 0.3,
            sample_rate: 0,
            position: 0,
            limit: None,
            open: false,
        }
    }

    /// Stop producing samples after `samples` have been delivered.
    pub fn with_limit(mut self, samples: u64) -> Self {
        self.limit = Some(samples);
        self
    }

    pub fn samples_delivered(&self) -> u64 {
        self.position
    }
}

impl CaptureDevice for ToneDevice {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<(), CaptureError> {
        if channels != 1 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "tone device is mono, {} channels requested",
                channels
            )));
        }
        self.sample_rate = sample_rate;
        self.open = true;
        debug!(frequency = self.frequency, sample_rate, "Tone device opened");
        Ok(())
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<usize, CaptureError> {
        if !self.open {
            return Err(CaptureError::Device("tone device is not open".to_string()));
        }

        let remaining = self
            .limit
            .map_or(block.len() as u64, |limit| limit.saturating_sub(self.position));
        let frames = block.len().min(remaining as usize);
        let rate = self.sample_rate as f64;

        for slot in &mut block[..frames] {
            let t = self.position as f64 / rate;
            let envelope = self.amplitude * (0.75 + 0.25 * (t * 2.0).sin());
            *slot = (envelope * (2.0 * PI * self.frequency * t).sin()) as f32;
            self.position += 1;
        }
        Ok(frames)
    }

    fn disconnect(&mut self) {
        self.open = false;
    }
}

/// Converts any supported WAV bit depth into normalized floats.
fn track_to_f32(track: BitDepth) -> Result<Vec<f32>, CaptureError> {
    let samples = match track {
        BitDepth::Eight(data) => data.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        BitDepth::Sixteen(data) => data.iter().map(|&s| s as f32 / 32768.0).collect(),
        BitDepth::TwentyFour(data) => data.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        BitDepth::ThirtyTwoFloat(data) => data,
        BitDepth::Empty => {
            return Err(CaptureError::UnsupportedFormat(
                "WAV file has no sample data".to_string(),
            ))
        }
    };
    Ok(samples)
}

/// Read a whole WAV stream and check it matches the capture format.
pub fn read_wav<R: Read + Seek>(
    reader: &mut R,
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<f32>, CaptureError> {
    let (header, track) = wav::read(reader)?;

    if header.sampling_rate != sample_rate || header.channel_count != channels {
        return Err(CaptureError::UnsupportedFormat(format!(
            "expected {} Hz with {} channel(s), file is {} Hz with {} channel(s)",
            sample_rate, channels, header.sampling_rate, header.channel_count
        )));
    }

    track_to_f32(track)
}

/// Plays a WAV file as if it were the microphone. Runs dry at end of file.
#[derive(Debug)]
pub struct WavFileDevice {
    path: PathBuf,
    samples: Vec<f32>,
    position: usize,
}

impl WavFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: Vec::new(),
            position: 0,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CaptureDevice for WavFileDevice {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<(), CaptureError> {
        let mut file = File::open(&self.path)?;
        self.samples = read_wav(&mut file, sample_rate, channels)?;
        self.position = 0;
        info!(
            path = %self.path.display(),
            samples = self.samples.len(),
            "WAV capture source opened"
        );
        Ok(())
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<usize, CaptureError> {
        let remaining = &self.samples[self.position..];
        let frames = block.len().min(remaining.len());
        block[..frames].copy_from_slice(&remaining[..frames]);
        self.position += frames;
        Ok(frames)
    }

    fn disconnect(&mut self) {
        self.samples = Vec::new();
        self.position = 0;
    }
}
