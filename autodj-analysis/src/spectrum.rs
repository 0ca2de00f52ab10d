//! FFT-based frequency snapshots for live analysis taps

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Default FFT size for analysis taps
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Decibel floor mapped to a normalized magnitude of 0.0
const MIN_DECIBELS: f32 = -100.0;

/// Decibel ceiling mapped to a normalized magnitude of 1.0
const MAX_DECIBELS: f32 = -30.0;

/// Time smoothing between consecutive snapshots
const SMOOTHING: f32 = 0.8;

/// One frequency-domain picture of a live signal.
///
/// `magnitudes` holds `fft_size / 2` bins normalized to 0.0 - 1.0 on a
/// decibel scale. `waveform` holds the time-domain block the snapshot was
/// taken from (may be empty when only magnitudes are known).
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySnapshot {
    pub magnitudes: Vec<f32>,
    pub waveform: Vec<f32>,
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl FrequencySnapshot {
    /// Build a snapshot from bin magnitudes alone
    pub fn from_magnitudes(magnitudes: Vec<f32>, sample_rate: u32) -> Self {
        let fft_size = magnitudes.len() * 2;
        Self {
            magnitudes,
            waveform: Vec::new(),
            sample_rate,
            fft_size,
        }
    }

    /// Number of frequency bins
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    /// Nyquist frequency in Hz
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Center frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }
}

/// Real-time FFT analyzer producing [`FrequencySnapshot`]s
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    previous_magnitudes: Vec<f32>,
    /// Pre-allocated FFT buffer to avoid allocation in analyze()
    fft_buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer with the default FFT size
    pub fn new(sample_rate: u32) -> Self {
        Self::with_fft_size(sample_rate, DEFAULT_FFT_SIZE)
    }

    /// Create an analyzer with a specific FFT size (rounded up to a power of two)
    pub fn with_fft_size(sample_rate: u32, fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Pre-compute Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            sample_rate,
            fft_size,
            fft,
            window,
            previous_magnitudes: vec![0.0; fft_size / 2],
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Analyze the most recent block of mono samples
    ///
    /// Only the last `fft_size` samples are used; shorter input is zero padded.
    pub fn analyze(&mut self, samples: &[f32]) -> FrequencySnapshot {
        let start = samples.len().saturating_sub(self.fft_size);
        let block = &samples[start..];

        for (i, slot) in self.fft_buffer.iter_mut().enumerate() {
            let sample = block.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.fft_buffer);

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        let mut magnitudes = vec![0.0f32; self.fft_size / 2];

        for (i, mag) in magnitudes.iter_mut().enumerate() {
            let linear = self.fft_buffer[i].norm() * scale;
            // Smooth in the linear domain before converting to dB
            let smoothed = self.previous_magnitudes[i] * SMOOTHING + linear * (1.0 - SMOOTHING);
            self.previous_magnitudes[i] = smoothed;

            let db = if smoothed > 1e-10 {
                20.0 * smoothed.log10()
            } else {
                MIN_DECIBELS
            };
            *mag = ((db - MIN_DECIBELS) / range).clamp(0.0, 1.0);
        }

        FrequencySnapshot {
            magnitudes,
            waveform: block.to_vec(),
            sample_rate: self.sample_rate,
            fft_size: self.fft_size,
        }
    }

    /// Forget smoothing state (e.g. when the analysed source changes)
    pub fn reset(&mut self) {
        self.previous_magnitudes.fill(0.0);
    }
}
