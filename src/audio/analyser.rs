//! # Frequency Analyser
//!
//! `Analyser` owns a byte snapshot of the magnitude spectrum of a live signal.
//! It is attached to a signal node once, at construction, and `update()` then
//! refreshes the snapshot in place on every rendering tick.
//!
//! ## Pieces:
//! - **SignalNode**: anything that can create an analyser node and feed it
//! - **AnalyserNode**: the transform primitive producing byte magnitudes
//! - **FftAnalyserNode**: `rustfft`-backed node with Web Audio semantics
//!   (Blackman window, time smoothing, decibel range mapped onto 0..=255)

use crate::audio::signal::{SampleTap, SignalBus};
use crate::config::AnalyserConfig;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Largest transform an `FftAnalyserNode` supports.
pub const MAX_FFT_SIZE: usize = 32768;

/// Frequency-domain primitive supplied by the audio engine.
pub trait AnalyserNode {
    /// Apply transform size, decibel range and smoothing.
    fn configure(&mut self, config: &AnalyserConfig);

    fn fft_size(&self) -> usize;

    fn frequency_bin_count(&self) -> usize {
        self.fft_size() / 2
    }

    /// Write the current magnitudes, one byte per bin, into `target`.
    fn byte_frequency_data(&mut self, target: &mut [u8]);
}

/// A live signal an analyser can be attached to.
pub trait SignalNode {
    type Analyser: AnalyserNode;

    fn create_analyser(&self) -> Self::Analyser;

    /// Route this node's signal into `analyser`.
    fn connect_analyser(&self, analyser: &Self::Analyser);
}

/// Periodic magnitude snapshot of a live signal.
pub struct Analyser<A: AnalyserNode> {
    node: A,
    data: Vec<u8>,
}

impl<A: AnalyserNode> Analyser<A> {
    /// Attach a 32-point analyser (16 bins) to `source`.
    pub fn new<N: SignalNode<Analyser = A>>(source: &N) -> Self {
        Self::with_config(source, &AnalyserConfig::default())
    }

    /// Attach an analyser with explicit settings. The transform size cannot
    /// change afterwards.
    pub fn with_config<N: SignalNode<Analyser = A>>(source: &N, config: &AnalyserConfig) -> Self {
        let mut node = source.create_analyser();
        node.configure(config);
        let bins = node.frequency_bin_count();
        source.connect_analyser(&node);

        Self {
            node,
            data: vec![0; bins],
        }
    }

    /// Overwrite the snapshot with the current magnitudes. Does not allocate.
    pub fn update(&mut self) {
        self.node.byte_frequency_data(&mut self.data);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn fft_size(&self) -> usize {
        self.node.fft_size()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.data.len()
    }

    pub fn node(&self) -> &A {
        &self.node
    }
}

/// Blackman window as used by Web Audio analysers.
fn blackman(size: usize) -> Vec<f32> {
    let alpha = 0.16f64;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    (0..size)
        .map(|n| {
            let x = n as f64 / size as f64;
            let w = a0 - a1 * (2.0 * std::f64::consts::PI * x).cos()
                + a2 * (4.0 * std::f64::consts::PI * x).cos();
            w as f32
        })
        .collect()
}

/// FFT analyser reading the newest samples from a tap.
pub struct FftAnalyserNode {
    tap: SampleTap,
    fft_size: usize,
    min_decibels: f32,
    max_decibels: f32,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl FftAnalyserNode {
    pub fn new() -> Self {
        let config = AnalyserConfig::default();
        let size = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            tap: SampleTap::new(MAX_FFT_SIZE),
            fft_size: size,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            smoothing: config.smoothing_time_constant,
            fft,
            window: blackman(size),
            time: vec![0.0; size],
            spectrum: vec![Complex::default(); size],
            scratch: vec![Complex::default(); scratch_len],
            smoothed: vec![0.0; size / 2],
        }
    }

    /// Tap this node reads from; connect it to a bus to feed the analyser.
    pub fn tap(&self) -> &SampleTap {
        &self.tap
    }

    fn plan(&mut self, size: usize) {
        let size = size.clamp(2, MAX_FFT_SIZE);
        self.fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        self.fft_size = size;
        self.window = blackman(size);
        self.time = vec![0.0; size];
        self.spectrum = vec![Complex::default(); size];
        self.scratch = vec![Complex::default(); self.fft.get_inplace_scratch_len()];
        self.smoothed = vec![0.0; size / 2];
    }
}

impl Default for FftAnalyserNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyserNode for FftAnalyserNode {
    fn configure(&mut self, config: &AnalyserConfig) {
        if config.fft_size != self.fft_size {
            self.plan(config.fft_size);
        }
        self.min_decibels = config.min_decibels;
        self.max_decibels = config.max_decibels;
        self.smoothing = config.smoothing_time_constant.clamp(0.0, 1.0);
    }

    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn byte_frequency_data(&mut self, target: &mut [u8]) {
        self.tap.copy_latest(&mut self.time);
        for ((bin, &sample), &weight) in self.spectrum.iter_mut().zip(&self.time).zip(&self.window) {
            *bin = Complex::new(sample * weight, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * scale;
            let value = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if value.is_finite() { value } else { 0.0 };
        }

        let range = self.max_decibels - self.min_decibels;
        for (byte, &magnitude) in target.iter_mut().zip(&self.smoothed) {
            let decibels = 20.0 * magnitude.log10();
            let scaled = 255.0 * (decibels - self.min_decibels) / range;
            // -inf (silence) and NaN both land on 0
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }
}

impl SignalNode for SignalBus {
    type Analyser = FftAnalyserNode;

    fn create_analyser(&self) -> FftAnalyserNode {
        FftAnalyserNode::new()
    }

    fn connect_analyser(&self, analyser: &FftAnalyserNode) {
        self.connect(analyser.tap().clone());
    }
}
