//! # Signal Buses and Taps
//!
//! A `SignalBus` plays the role of a gain node: audio flowing through it is
//! scaled by its gain and fanned out to every connected `SampleTap`. Taps are
//! bounded circular buffers holding the most recent samples, which is all an
//! analyser needs to compute a spectrum snapshot.
//!
//! ## Key Features:
//! - **Circular taps**: Old samples are discarded once a tap reaches capacity
//! - **Cheap handles**: Buses and taps are `Arc` handles, so the capture side,
//!   the engine and the analysers can each hold one
//! - **Synchronous disconnect**: `disconnect_all` returns only after every tap
//!   has been detached

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded window over the latest samples of a signal.
#[derive(Debug, Clone)]
pub struct SampleTap {
    ring: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SampleTap {
    /// Create a tap remembering at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append samples, discarding the oldest ones beyond capacity.
    pub fn push(&self, samples: &[f32]) {
        let mut ring = lock(&self.ring);
        let skip = samples.len().saturating_sub(self.capacity);
        for &sample in &samples[skip..] {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(sample);
        }
    }

    /// Copy the newest `out.len()` samples into `out`, oldest first.
    ///
    /// When fewer samples are available the front of `out` is zero-filled so
    /// the newest sample always lands in the last slot. Returns the number of
    /// real samples copied.
    pub fn copy_latest(&self, out: &mut [f32]) -> usize {
        let ring = lock(&self.ring);
        let available = ring.len().min(out.len());
        let pad = out.len() - available;
        out[..pad].fill(0.0);
        for (slot, &sample) in out[pad..].iter_mut().zip(ring.range(ring.len() - available..)) {
            *slot = sample;
        }
        available
    }

    pub fn len(&self) -> usize {
        lock(&self.ring).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.ring).is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        lock(&self.ring).clear();
    }
}

#[derive(Debug)]
struct BusState {
    gain: f32,
    taps: Vec<SampleTap>,
    scratch: Vec<f32>,
}

/// Gain stage that fans its signal out to connected taps.
#[derive(Debug, Clone)]
pub struct SignalBus {
    name: Arc<str>,
    state: Arc<Mutex<BusState>>,
}

impl SignalBus {
    /// Create a bus with unity gain and no taps.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(BusState {
                gain: 1.0,
                taps: Vec::new(),
                scratch: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gain(&self) -> f32 {
        lock(&self.state).gain
    }

    pub fn set_gain(&self, gain: f32) {
        lock(&self.state).gain = gain;
    }

    /// Attach a tap; it receives every block processed from now on.
    pub fn connect(&self, tap: SampleTap) {
        lock(&self.state).taps.push(tap);
    }

    /// Detach every tap before returning.
    pub fn disconnect_all(&self) {
        lock(&self.state).taps.clear();
    }

    pub fn tap_count(&self) -> usize {
        lock(&self.state).taps.len()
    }

    /// Push one block through the bus.
    pub fn process(&self, block: &[f32]) {
        let mut state = lock(&self.state);
        if state.taps.is_empty() {
            return;
        }

        let BusState { gain, taps, scratch } = &mut *state;
        if *gain == 1.0 {
            for tap in taps.iter() {
                tap.push(block);
            }
            return;
        }

        scratch.clear();
        scratch.extend(block.iter().map(|&s| s * *gain));
        for tap in taps.iter() {
            tap.push(scratch.as_slice());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_keeps_latest_samples() {
        let tap = SampleTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0, 6.0]);
        assert_eq!(tap.len(), 4);

        let mut out = [0.0; 4];
        assert_eq!(tap.copy_latest(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_tap_pads_front_when_short() {
        let tap = SampleTap::new(8);
        tap.push(&[1.0, 2.0]);

        let mut out = [9.0; 4];
        assert_eq!(tap.copy_latest(&mut out), 2);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_oversized_push_keeps_tail() {
        let tap = SampleTap::new(2);
        tap.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut out = [0.0; 2];
        tap.copy_latest(&mut out);
        assert_eq!(out, [4.0, 5.0]);
    }

    #[test]
    fn test_bus_applies_gain_to_every_tap() {
        let bus = SignalBus::new("input");
        let first = SampleTap::new(4);
        let second = SampleTap::new(4);
        bus.connect(first.clone());
        bus.connect(second.clone());
        bus.set_gain(0.5);

        bus.process(&[1.0, -1.0]);

        let mut out = [0.0; 2];
        first.copy_latest(&mut out);
        assert_eq!(out, [0.5, -0.5]);
        second.copy_latest(&mut out);
        assert_eq!(out, [0.5, -0.5]);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let bus = SignalBus::new("output");
        let tap = SampleTap::new(4);
        bus.connect(tap.clone());
        bus.disconnect_all();
        bus.process(&[1.0]);

        assert_eq!(bus.tap_count(), 0);
        assert!(tap.is_empty());
    }
}
