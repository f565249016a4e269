//! # Audio Engine Boundary
//!
//! The playback scheduler never talks to an audio backend directly. It goes
//! through the `AudioEngine` capability trait: a monotonic clock, buffer
//! allocation, starting and stopping buffer sources at absolute times, the
//! output node sources are connected to, and per-source completion
//! notifications.
//!
//! `SimulatedEngine` implements the trait on a virtual clock. It mixes active
//! sources into its output node as time is advanced, which is enough to drive
//! the analyser and to exercise the scheduler without audio hardware.

use crate::audio::scheduler::SourceHandle;
use crate::audio::signal::SignalBus;
use crate::error::SchedulingAnomaly;
use std::mem;

/// Decoded, playable audio: one equally long `Vec<f32>` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer, rejecting layouts no engine can play.
    ///
    /// ## Rejected:
    /// - zero channels or a zero sample rate
    /// - channels of different lengths
    /// - zero-length buffers
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, SchedulingAnomaly> {
        let rejected = |reason: &str| SchedulingAnomaly::BufferRejected {
            channels: channels.len(),
            sample_rate,
            reason: reason.to_string(),
        };

        if channels.is_empty() {
            return Err(rejected("no channels"));
        }
        if sample_rate == 0 {
            return Err(rejected("zero sample rate"));
        }
        let length = channels[0].len();
        if length == 0 {
            return Err(rejected("zero-length buffer"));
        }
        if channels.iter().any(|c| c.len() != length) {
            return Err(rejected("channels differ in length"));
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Length in frames.
    pub fn length(&self) -> usize {
        self.channels[0].len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.length() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Average of all channels, frame by frame.
    pub fn mixdown(&self) -> Vec<f32> {
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.length())
            .map(|frame| self.channels.iter().map(|c| c[frame]).sum::<f32>() * scale)
            .collect()
    }
}

/// Capabilities the playback scheduler needs from an audio backend.
pub trait AudioEngine {
    /// Monotonic engine clock, in seconds.
    fn current_time(&self) -> f64;

    /// Allocate a playable buffer from decoded channels.
    fn create_buffer(
        &mut self,
        channels: Vec<Vec<f32>>,
        sample_rate: u32,
    ) -> Result<AudioBuffer, SchedulingAnomaly> {
        AudioBuffer::new(channels, sample_rate)
    }

    /// Create a buffer source connected to the output node and start it at
    /// the absolute engine time `when`. `handle` comes back in the completion
    /// notification for this source.
    fn start_source(
        &mut self,
        handle: SourceHandle,
        buffer: &AudioBuffer,
        when: f64,
    ) -> Result<(), SchedulingAnomaly>;

    /// Stop a source immediately. Its completion is still reported.
    fn stop_source(&mut self, handle: SourceHandle);

    /// Gain node every source is connected to before the destination.
    fn output_node(&self) -> SignalBus;

    /// Advance by `elapsed` seconds and collect completion notifications for
    /// sources that ended (naturally or by `stop_source`) since the last call.
    fn render(&mut self, elapsed: f64) -> Vec<SourceHandle>;
}

const FRAME_EPSILON: f64 = 1e-6;

#[derive(Debug)]
struct Voice {
    handle: SourceHandle,
    start: f64,
    rate: f64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> f64 {
        self.start + self.samples.len() as f64 / self.rate
    }

    fn sample_at(&self, time: f64) -> Option<f32> {
        // Tolerance keeps frame boundaries from flickering on float rounding
        let offset = (time - self.start) * self.rate;
        if offset < -FRAME_EPSILON {
            return None;
        }
        let index = (offset + FRAME_EPSILON).floor().max(0.0) as usize;
        self.samples.get(index).copied()
    }
}

/// Virtual-clock engine rendering into an output bus.
#[derive(Debug)]
pub struct SimulatedEngine {
    sample_rate: u32,
    clock: f64,
    rendered_frames: u64,
    voices: Vec<Voice>,
    stopped: Vec<SourceHandle>,
    output: SignalBus,
    mix: Vec<f32>,
}

impl SimulatedEngine {
    /// Create an engine rendering at `sample_rate` into `output`.
    pub fn new(sample_rate: u32, output: SignalBus) -> Self {
        Self {
            sample_rate,
            clock: 0.0,
            rendered_frames: 0,
            voices: Vec::new(),
            stopped: Vec::new(),
            output,
            mix: Vec::new(),
        }
    }

    /// Number of sources started and not yet reported as ended.
    pub fn playing_count(&self) -> usize {
        self.voices.len()
    }

    /// Start time of a playing source.
    pub fn start_time_of(&self, handle: SourceHandle) -> Option<f64> {
        self.voices.iter().find(|v| v.handle == handle).map(|v| v.start)
    }

    fn mix_until(&mut self, end_frame: u64) {
        if end_frame <= self.rendered_frames {
            return;
        }

        let frames = (end_frame - self.rendered_frames) as usize;
        let rate = self.sample_rate as f64;
        self.mix.clear();
        self.mix.resize(frames, 0.0);
        for (offset, slot) in self.mix.iter_mut().enumerate() {
            let time = (self.rendered_frames + offset as u64) as f64 / rate;
            *slot = self.voices.iter().filter_map(|v| v.sample_at(time)).sum();
        }

        self.output.process(&self.mix);
        self.rendered_frames = end_frame;
    }
}

impl AudioEngine for SimulatedEngine {
    fn current_time(&self) -> f64 {
        self.clock
    }

    fn start_source(
        &mut self,
        handle: SourceHandle,
        buffer: &AudioBuffer,
        when: f64,
    ) -> Result<(), SchedulingAnomaly> {
        if !when.is_finite() || when < 0.0 {
            return Err(SchedulingAnomaly::StartFailed(format!(
                "invalid start time {}",
                when
            )));
        }

        self.voices.push(Voice {
            handle,
            start: when,
            rate: buffer.sample_rate() as f64,
            samples: buffer.mixdown(),
        });
        Ok(())
    }

    fn stop_source(&mut self, handle: SourceHandle) {
        if let Some(position) = self.voices.iter().position(|v| v.handle == handle) {
            self.voices.remove(position);
            self.stopped.push(handle);
        }
    }

    fn output_node(&self) -> SignalBus {
        self.output.clone()
    }

    fn render(&mut self, elapsed: f64) -> Vec<SourceHandle> {
        if elapsed.is_finite() && elapsed > 0.0 {
            self.clock += elapsed;
        }
        let end_frame = (self.clock * self.sample_rate as f64).floor() as u64;
        self.mix_until(end_frame);

        let mut ended = mem::take(&mut self.stopped);
        let clock = self.clock;
        let mut finished: Vec<&Voice> = self.voices.iter().filter(|v| v.end() <= clock).collect();
        finished.sort_by(|a, b| a.end().total_cmp(&b.end()));
        ended.extend(finished.iter().map(|v| v.handle));
        self.voices.retain(|v| v.end() > clock);
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::signal::SampleTap;

    fn handle(index: u32) -> SourceHandle {
        SourceHandle::from_raw_parts(index, 0)
    }

    #[test]
    fn test_buffer_validation() {
        assert!(AudioBuffer::new(vec![], 24000).is_err());
        assert!(AudioBuffer::new(vec![vec![]], 24000).is_err());
        assert!(AudioBuffer::new(vec![vec![0.0; 4]], 0).is_err());
        assert!(AudioBuffer::new(vec![vec![0.0; 4], vec![0.0; 3]], 24000).is_err());

        let buffer = AudioBuffer::new(vec![vec![0.0; 2400]], 24000).unwrap();
        assert_eq!(buffer.length(), 2400);
        assert!((buffer.duration() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_mixdown_averages_channels() {
        let buffer = AudioBuffer::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], 8000).unwrap();
        assert_eq!(buffer.mixdown(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_render_reports_natural_completion() {
        let mut engine = SimulatedEngine::new(1000, SignalBus::new("output"));
        let buffer = AudioBuffer::new(vec![vec![0.25; 100]], 1000).unwrap();
        engine.start_source(handle(0), &buffer, 0.05).unwrap();

        assert!(engine.render(0.1).is_empty());
        assert_eq!(engine.playing_count(), 1);
        assert_eq!(engine.render(0.06), vec![handle(0)]);
        assert_eq!(engine.playing_count(), 0);
    }

    #[test]
    fn test_stop_reports_completion_on_next_render() {
        let mut engine = SimulatedEngine::new(1000, SignalBus::new("output"));
        let buffer = AudioBuffer::new(vec![vec![0.25; 1000]], 1000).unwrap();
        engine.start_source(handle(3), &buffer, 0.0).unwrap();
        engine.stop_source(handle(3));
        engine.stop_source(handle(3));

        assert_eq!(engine.render(0.0), vec![handle(3)]);
        assert!(engine.render(0.0).is_empty());
    }

    #[test]
    fn test_render_mixes_into_output_node() {
        let output = SignalBus::new("output");
        let tap = SampleTap::new(16);
        output.connect(tap.clone());

        let mut engine = SimulatedEngine::new(1000, output);
        let buffer = AudioBuffer::new(vec![vec![0.5; 4]], 1000).unwrap();
        engine.start_source(handle(0), &buffer, 0.002).unwrap();
        engine.render(0.008);

        let mut out = [0.0; 8];
        assert_eq!(tap.copy_latest(&mut out), 8);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_invalid_start_time() {
        let mut engine = SimulatedEngine::new(1000, SignalBus::new("output"));
        let buffer = AudioBuffer::new(vec![vec![0.0; 4]], 1000).unwrap();
        assert!(engine.start_source(handle(0), &buffer, f64::NAN).is_err());
        assert!(engine.start_source(handle(0), &buffer, -1.0).is_err());
    }
}
