//! # Microphone Capture
//!
//! Drives a capture device block by block and turns each block into an
//! upstream wire message.
//!
//! ## Capture Lifecycle:
//! 1. **Idle**: Nothing is connected
//! 2. **Recording**: Device opened; every processing tick yields one block
//! 3. Back to **Idle** on `stop()`, on a device failure, or when the device runs dry
//!
//! `stop()` disconnects the device before it returns, and `process_tick()`
//! checks the status first, so no block is emitted after a stop completes.

use crate::audio::pcm::{create_blob, MediaBlob};
use crate::audio::signal::SignalBus;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use tracing::{debug, info, warn};

/// Source of fixed-size float sample blocks.
pub trait CaptureDevice {
    /// Acquire the device (this is where permission prompts happen).
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<(), CaptureError>;

    /// Fill `block` with the next samples and return how many were written.
    /// Zero means the source is exhausted. A short count is padded with
    /// silence by the caller, so every emitted block has the full size.
    fn read_block(&mut self, block: &mut [f32]) -> Result<usize, CaptureError>;

    /// Release the device. Must not block on in-flight audio.
    fn disconnect(&mut self);
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<(), CaptureError> {
        (**self).open(sample_rate, channels)
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<usize, CaptureError> {
        (**self).read_block(block)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

/// Current capture status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Recording,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CaptureStatus::Idle => "idle",
            CaptureStatus::Recording => "recording",
        }
    }
}

/// Capture controller owning one device.
pub struct Capture<D: CaptureDevice> {
    device: D,
    config: CaptureConfig,
    status: CaptureStatus,
    connected: bool,
    input_node: SignalBus,
    block: Vec<f32>,
    status_text: String,
    blocks_emitted: u64,
}

impl<D: CaptureDevice> Capture<D> {
    pub fn new(device: D, config: CaptureConfig) -> Self {
        let block = vec![0.0; config.block_size];
        Self {
            device,
            config,
            status: CaptureStatus::Idle,
            connected: false,
            input_node: SignalBus::new("input"),
            block,
            status_text: String::new(),
            blocks_emitted: 0,
        }
    }

    /// Open the device and begin recording.
    ///
    /// ## State Transition:
    /// Idle → Recording, or Idle → Idle with the error reported in the
    /// status text when the device cannot be opened. Calling it while
    /// already recording does nothing.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.status == CaptureStatus::Recording {
            return Ok(());
        }

        self.set_status_text("Requesting microphone access...");
        if let Err(err) = self.device.open(self.config.sample_rate, self.config.channels) {
            warn!(error = %err, "Error starting recording");
            self.stop();
            self.set_status_text(format!("Error: {}", err));
            return Err(err);
        }
        self.connected = true;

        self.set_status_text("Microphone access granted. Starting capture...");
        self.status = CaptureStatus::Recording;
        self.set_status_text("Recording... Capturing PCM chunks.");
        info!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "Capture started"
        );
        Ok(())
    }

    /// Run one processing tick.
    ///
    /// Returns the wire message for the captured block while recording, and
    /// `None` otherwise. A device failure or an exhausted source stops the
    /// capture. A short read is padded with zeros to the configured block size.
    pub fn process_tick(&mut self) -> Option<MediaBlob> {
        if self.status != CaptureStatus::Recording {
            return None;
        }

        let frames = match self.device.read_block(&mut self.block) {
            Ok(0) => {
                info!(blocks = self.blocks_emitted, "Capture source exhausted");
                self.stop();
                return None;
            }
            Ok(frames) => frames.min(self.block.len()),
            Err(err) => {
                warn!(error = %err, "Capture device failed");
                self.stop();
                self.set_status_text(format!("Error: {}", err));
                return None;
            }
        };

        if frames < self.block.len() {
            debug!(frames, block_size = self.block.len(), "Padding short capture block");
            self.block[frames..].fill(0.0);
        }

        self.input_node.process(&self.block);
        self.blocks_emitted += 1;
        debug!(frames, "Captured block");
        Some(create_blob(&self.block))
    }

    /// Stop recording and disconnect the device before returning.
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        if self.status == CaptureStatus::Idle && !self.connected {
            return;
        }

        self.set_status_text("Stopping recording...");
        self.status = CaptureStatus::Idle;
        if self.connected {
            self.device.disconnect();
            self.connected = false;
        }
        self.set_status_text("Recording stopped. Click Start to begin again.");
        info!(blocks = self.blocks_emitted, "Capture stopped");
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn is_recording(&self) -> bool {
        self.status == CaptureStatus::Recording
    }

    /// User-facing description of the last capture transition.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Node carrying the live microphone signal, for analysers.
    pub fn input_node(&self) -> &SignalBus {
        &self.input_node
    }

    pub fn blocks_emitted(&self) -> u64 {
        self.blocks_emitted
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn set_status_text(&mut self, text: impl Into<String>) {
        self.status_text = text.into();
        debug!(status = %self.status_text, "Capture status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::signal::SampleTap;
    use crate::audio::transcoder;
    use crate::config::AppConfig;

    /// Device producing a fixed number of constant blocks.
    #[derive(Default)]
    struct ScriptedDevice {
        deny: bool,
        fail_reads: bool,
        blocks_left: usize,
        /// Frames delivered by the final block; zero means a full block
        last_block_frames: usize,
        opened: usize,
        disconnected: usize,
    }

    impl CaptureDevice for ScriptedDevice {
        fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<(), CaptureError> {
            if self.deny {
                return Err(CaptureError::PermissionDenied("denied".to_string()));
            }
            self.opened += 1;
            Ok(())
        }

        fn read_block(&mut self, block: &mut [f32]) -> Result<usize, CaptureError> {
            if self.fail_reads {
                return Err(CaptureError::Device("unplugged".to_string()));
            }
            if self.blocks_left == 0 {
                return Ok(0);
            }
            self.blocks_left -= 1;
            let frames = if self.blocks_left == 0 && self.last_block_frames > 0 {
                self.last_block_frames
            } else {
                block.len()
            };
            block[..frames].fill(0.5);
            Ok(frames)
        }

        fn disconnect(&mut self) {
            self.disconnected += 1;
        }
    }

    fn capture(device: ScriptedDevice) -> Capture<ScriptedDevice> {
        Capture::new(device, AppConfig::default().capture)
    }

    #[test]
    fn test_start_and_emit_blocks() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 2,
            ..Default::default()
        });
        assert!(capture.process_tick().is_none());

        capture.start().unwrap();
        assert!(capture.is_recording());
        assert_eq!(capture.status_text(), "Recording... Capturing PCM chunks.");

        let blob = capture.process_tick().unwrap();
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(transcoder::decode(&blob.data).unwrap().len(), 512);
        assert_eq!(capture.blocks_emitted(), 1);
    }

    #[test]
    fn test_permission_denied_rolls_back_to_idle() {
        let mut capture = capture(ScriptedDevice {
            deny: true,
            ..Default::default()
        });

        let err = capture.start().unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert_eq!(capture.status(), CaptureStatus::Idle);
        assert!(capture.status_text().starts_with("Error: "));
        assert!(capture.process_tick().is_none());
        assert_eq!(capture.device().disconnected, 0);
    }

    #[test]
    fn test_no_block_after_stop() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 10,
            ..Default::default()
        });
        capture.start().unwrap();
        assert!(capture.process_tick().is_some());

        capture.stop();
        assert_eq!(capture.device().disconnected, 1);
        assert!(capture.process_tick().is_none());
        assert_eq!(capture.blocks_emitted(), 1);

        // Stopping twice does not disconnect twice
        capture.stop();
        assert_eq!(capture.device().disconnected, 1);
    }

    #[test]
    fn test_exhausted_source_stops_capture() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 1,
            ..Default::default()
        });
        capture.start().unwrap();
        assert!(capture.process_tick().is_some());
        assert!(capture.process_tick().is_none());
        assert!(!capture.is_recording());
        assert_eq!(capture.device().disconnected, 1);
    }

    #[test]
    fn test_device_failure_stops_capture() {
        let mut capture = capture(ScriptedDevice {
            fail_reads: true,
            ..Default::default()
        });
        capture.start().unwrap();
        assert!(capture.process_tick().is_none());
        assert_eq!(capture.status(), CaptureStatus::Idle);
        assert_eq!(capture.status_text(), "Error: capture device failure: unplugged");
    }

    #[test]
    fn test_blocks_feed_input_node() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 1,
            ..Default::default()
        });
        let tap = SampleTap::new(256);
        capture.input_node().connect(tap.clone());

        capture.start().unwrap();
        capture.process_tick().unwrap();
        assert_eq!(tap.len(), 256);
    }

    #[test]
    fn test_short_final_block_is_zero_padded() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 2,
            last_block_frames: 10,
            ..Default::default()
        });
        capture.start().unwrap();
        capture.process_tick().unwrap();

        let blob = capture.process_tick().unwrap();
        let samples: Vec<i16> = transcoder::decode(&blob.data)
            .unwrap()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(samples.len(), 256);
        assert!(samples[..10].iter().all(|&s| s == 16384));
        // The previous block's samples must not leak into the padding
        assert!(samples[10..].iter().all(|&s| s == 0));

        assert!(capture.process_tick().is_none());
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_start_is_noop_while_recording() {
        let mut capture = capture(ScriptedDevice {
            blocks_left: 1,
            ..Default::default()
        });
        capture.start().unwrap();
        capture.start().unwrap();
        assert_eq!(capture.device().opened, 1);
    }
}
