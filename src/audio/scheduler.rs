//! # Playback Scheduler
//!
//! Turns decoded chunks into back-to-back playback against the engine clock.
//!
//! ## Scheduling Rule:
//! Each accepted chunk starts at `max(next_start_time, engine.current_time())`
//! and pushes `next_start_time` to its own end. Chunks arriving faster than
//! real time therefore play gaplessly; a late chunk leaves a gap but never
//! overlaps the previous one.
//!
//! ## Active Sources:
//! Playing sources live in an arena indexed by `SourceHandle`. Every slot
//! carries a generation counter that is bumped when the slot is released, so a
//! completion notification that arrives after an interrupt (or after the slot
//! was reused) cannot remove the wrong source.
//!
//! ## State Machine:
//! `Idle -> Playing` when a chunk is accepted, `Playing -> Idle` when the last
//! source ends or on `interrupt()` / `reset()`.

use crate::audio::engine::{AudioBuffer, AudioEngine};
use crate::audio::pcm::AudioChunk;
use crate::error::AudioResult;
use std::fmt;
use tracing::{debug, info, warn};

/// Generation-checked reference to a scheduled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle {
    index: u32,
    generation: u32,
}

impl SourceHandle {
    /// Rebuild a handle from its parts, e.g. when an engine reports it back.
    pub fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// One scheduled unit of decoded audio.
#[derive(Debug)]
pub struct PlaybackSource {
    buffer: AudioBuffer,
    start_at: f64,
}

impl PlaybackSource {
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn start_at(&self) -> f64 {
        self.start_at
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    pub fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    source: Option<PlaybackSource>,
}

/// Whether any scheduled audio is still pending or playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

impl PlaybackState {
    pub fn as_str(&self) -> &str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
        }
    }
}

/// Schedules decoded chunks for gapless playback on an `AudioEngine`.
pub struct PlaybackScheduler<E: AudioEngine> {
    engine: E,
    next_start_time: f64,
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: usize,
}

impl<E: AudioEngine> PlaybackScheduler<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            next_start_time: 0.0,
            slots: Vec::new(),
            free: Vec::new(),
            active: 0,
        }
    }

    /// Decode and schedule one chunk.
    ///
    /// Never fails outward: a chunk that cannot be decoded or that the engine
    /// refuses is logged and dropped, leaving `next_start_time` and the active
    /// set exactly as they were. Returns the handle of the new source when the
    /// chunk was accepted.
    pub fn schedule(&mut self, chunk: AudioChunk) -> Option<SourceHandle> {
        let len = chunk.data().len();
        match self.try_schedule(chunk) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(bytes = len, error = %err, "Dropping audio chunk");
                None
            }
        }
    }

    fn try_schedule(&mut self, chunk: AudioChunk) -> AudioResult<SourceHandle> {
        let channels = chunk.to_channels()?;
        let buffer = self.engine.create_buffer(channels, chunk.sample_rate())?;

        let start_at = self.next_start_time.max(self.engine.current_time());
        let handle = self.allocate();
        if let Err(err) = self.engine.start_source(handle, &buffer, start_at) {
            self.release(handle.index);
            return Err(err.into());
        }

        let duration = buffer.duration();
        self.slots[handle.index as usize].source = Some(PlaybackSource { buffer, start_at });
        self.active += 1;
        self.next_start_time = start_at + duration;

        debug!(
            source = %handle,
            start_at,
            duration,
            next_start_time = self.next_start_time,
            "Scheduled playback source"
        );
        Ok(handle)
    }

    /// Completion notification from the engine.
    ///
    /// Returns `true` if the handle referred to a live source. Stale handles
    /// (the source was already interrupted, or the slot has been reused) are
    /// ignored.
    pub fn on_source_ended(&mut self, handle: SourceHandle) -> bool {
        if !self.is_active(handle) {
            debug!(source = %handle, "Ignoring completion for stale source");
            return false;
        }

        self.release(handle.index);
        self.active -= 1;
        debug!(source = %handle, remaining = self.active, "Playback source ended");
        true
    }

    /// Stop every active source immediately and forget queued time.
    ///
    /// Idempotent; returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let mut stopped = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].source.is_none() {
                continue;
            }
            let handle = SourceHandle {
                index: index as u32,
                generation: self.slots[index].generation,
            };
            self.engine.stop_source(handle);
            self.release(handle.index);
            stopped += 1;
        }

        self.active = 0;
        self.next_start_time = 0.0;
        if stopped > 0 {
            info!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Clear all scheduling state, as when the downstream session is torn
    /// down and reacquired.
    pub fn reset(&mut self) {
        let stopped = self.interrupt();
        info!(stopped, "Playback scheduler reset");
    }

    pub fn state(&self) -> PlaybackState {
        if self.active == 0 {
            PlaybackState::Idle
        } else {
            PlaybackState::Playing
        }
    }

    /// End time of the last scheduled source; 0 after an interrupt or reset.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn is_active(&self, handle: SourceHandle) -> bool {
        self.source(handle).is_some()
    }

    pub fn source(&self, handle: SourceHandle) -> Option<&PlaybackSource> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.source.as_ref())
    }

    /// Handles of every source currently playing, in slot order.
    pub fn active_handles(&self) -> Vec<SourceHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.source.is_some())
            .map(|(index, slot)| SourceHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn allocate(&mut self) -> SourceHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        SourceHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.source = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::SimulatedEngine;
    use crate::audio::signal::SignalBus;
    use crate::error::SchedulingAnomaly;

    const RATE: u32 = 24000;

    /// Mono chunk of `frames` frames of silence.
    fn chunk(frames: usize) -> AudioChunk {
        AudioChunk::new(vec![0u8; frames * 2], RATE, 1)
    }

    fn scheduler() -> PlaybackScheduler<SimulatedEngine> {
        PlaybackScheduler::new(SimulatedEngine::new(RATE, SignalBus::new("output")))
    }

    /// Engine whose buffer allocation always fails.
    struct RejectingEngine {
        started: usize,
    }

    impl AudioEngine for RejectingEngine {
        fn current_time(&self) -> f64 {
            1.0
        }

        fn create_buffer(
            &mut self,
            channels: Vec<Vec<f32>>,
            sample_rate: u32,
        ) -> Result<AudioBuffer, SchedulingAnomaly> {
            Err(SchedulingAnomaly::BufferRejected {
                channels: channels.len(),
                sample_rate,
                reason: "out of memory".to_string(),
            })
        }

        fn start_source(
            &mut self,
            _handle: SourceHandle,
            _buffer: &AudioBuffer,
            _when: f64,
        ) -> Result<(), SchedulingAnomaly> {
            self.started += 1;
            Ok(())
        }

        fn stop_source(&mut self, _handle: SourceHandle) {}

        fn output_node(&self) -> SignalBus {
            SignalBus::new("output")
        }

        fn render(&mut self, _elapsed: f64) -> Vec<SourceHandle> {
            Vec::new()
        }
    }

    #[test]
    fn test_chunks_arriving_early_play_gaplessly() {
        let mut scheduler = scheduler();
        let handles: Vec<_> = (0..3).map(|_| scheduler.schedule(chunk(2400)).unwrap()).collect();

        let starts: Vec<f64> = handles
            .iter()
            .map(|h| scheduler.source(*h).unwrap().start_at())
            .collect();
        assert_eq!(starts[0], 0.0);
        assert!((starts[1] - 0.1).abs() < 1e-9);
        assert!((starts[2] - 0.2).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 0.3).abs() < 1e-9);
        assert_eq!(scheduler.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_late_chunk_leaves_gap_not_overlap() {
        let mut scheduler = scheduler();
        let first = scheduler.schedule(chunk(2400)).unwrap();
        let ended = scheduler.engine_mut().render(0.25);
        assert_eq!(ended, vec![first]);
        assert!(scheduler.on_source_ended(first));

        let second = scheduler.schedule(chunk(2400)).unwrap();
        let start = scheduler.source(second).unwrap().start_at();
        assert!((start - 0.25).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_start_times_never_decrease_or_overlap() {
        let mut scheduler = scheduler();
        let mut previous_end = 0.0;
        let mut previous_start = 0.0;
        // Mix of chunk sizes and arrival gaps, some faster and some slower than real time
        let plan = [(480, 0.0), (2400, 0.01), (1200, 0.2), (240, 0.0), (4800, 0.5), (960, 0.05)];

        for (frames, advance) in plan {
            for handle in scheduler.engine_mut().render(advance) {
                scheduler.on_source_ended(handle);
            }
            let handle = scheduler.schedule(chunk(frames)).unwrap();
            let source = scheduler.source(handle).unwrap();

            assert!(source.start_at() >= previous_start);
            assert!(source.start_at() >= previous_end - 1e-9);
            previous_start = source.start_at();
            previous_end = source.end_at();
        }
    }

    #[test]
    fn test_malformed_chunk_is_dropped_without_side_effects() {
        let mut scheduler = scheduler();
        scheduler.schedule(chunk(2400)).unwrap();
        let before = scheduler.next_start_time();

        assert!(scheduler.schedule(AudioChunk::new(vec![0u8; 3], RATE, 1)).is_none());
        assert!(scheduler.schedule(AudioChunk::new(vec![0u8; 6], RATE, 2)).is_none());
        assert_eq!(scheduler.next_start_time(), before);
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_empty_chunk_is_a_scheduling_anomaly() {
        let mut scheduler = scheduler();
        assert!(scheduler.schedule(chunk(0)).is_none());
        assert_eq!(scheduler.state(), PlaybackState::Idle);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_engine_rejection_leaves_state_unperturbed() {
        let mut scheduler = PlaybackScheduler::new(RejectingEngine { started: 0 });
        assert!(scheduler.schedule(chunk(2400)).is_none());
        assert_eq!(scheduler.engine().started, 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_interrupt_clears_everything() {
        let mut scheduler = scheduler();
        for _ in 0..5 {
            scheduler.schedule(chunk(2400)).unwrap();
        }
        assert_eq!(scheduler.active_count(), 5);

        assert_eq!(scheduler.interrupt(), 5);
        assert_eq!(scheduler.active_count(), 0);
        assert!(scheduler.active_handles().is_empty());
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.state(), PlaybackState::Idle);
        assert_eq!(scheduler.engine().playing_count(), 0);

        // Idempotent on an empty set
        assert_eq!(scheduler.interrupt(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_late_completion_after_interrupt_is_ignored() {
        let mut scheduler = scheduler();
        let stale = scheduler.schedule(chunk(2400)).unwrap();
        scheduler.interrupt();

        // The slot is reused by the next chunk with a new generation
        let fresh = scheduler.schedule(chunk(2400)).unwrap();
        assert_eq!(fresh.index(), stale.index());
        assert_ne!(fresh.generation(), stale.generation());

        // The engine still reports the stopped source's completion
        let ended = scheduler.engine_mut().render(0.0);
        assert_eq!(ended, vec![stale]);
        assert!(!scheduler.on_source_ended(stale));
        assert!(scheduler.is_active(fresh));
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_double_completion_is_ignored() {
        let mut scheduler = scheduler();
        let handle = scheduler.schedule(chunk(240)).unwrap();
        assert!(scheduler.on_source_ended(handle));
        assert!(!scheduler.on_source_ended(handle));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_reset_matches_interrupt() {
        let mut scheduler = scheduler();
        scheduler.schedule(chunk(2400)).unwrap();
        scheduler.schedule(chunk(2400)).unwrap();
        scheduler.reset();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_interrupt_then_schedule_uses_current_clock() {
        let mut scheduler = scheduler();
        scheduler.schedule(chunk(24000)).unwrap();
        scheduler.engine_mut().render(0.4);
        scheduler.interrupt();

        let handle = scheduler.schedule(chunk(2400)).unwrap();
        let start = scheduler.source(handle).unwrap().start_at();
        assert!((start - 0.4).abs() < 1e-9);
    }
}
