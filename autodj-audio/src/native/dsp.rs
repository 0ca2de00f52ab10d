//! Stereo node processors for the native engine
//!
//! Every processor works in place on one render quantum of interleaved
//! stereo frames. Parameters are k-rate: read once per quantum.

use std::f32::consts::PI;
use std::sync::Arc;

use autodj_analysis::FilterType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Length of the generated reverb impulse
pub const IMPULSE_SECS: f32 = 0.5;

/// Biquad filter coefficients (normalized by a0)
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };

    /// RBJ Audio EQ Cookbook
    fn design(filter_type: FilterType, sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let freq = freq.clamp(10.0, sample_rate * 0.49);
        let q = q.max(0.0001);
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let a = 10.0f32.powf(gain_db / 40.0);

        // (b0, b1, b2, a0, a1, a2) in cookbook naming
        let (n0, n1, n2, d0, d1, d2) = match filter_type {
            FilterType::LowPass => {
                let n = (1.0 - cos_omega) / 2.0;
                (n, 1.0 - cos_omega, n, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
            }
            FilterType::HighPass => {
                let n = (1.0 + cos_omega) / 2.0;
                (n, -(1.0 + cos_omega), n, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
            }
            FilterType::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha),
            FilterType::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_omega,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_omega,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf | FilterType::HighShelf if gain_db.abs() < 0.01 => return Self::UNITY,
            FilterType::LowShelf => {
                // Shelf slope 1
                let two_sqrt_a_alpha = a.sqrt() * sin_omega * std::f32::consts::SQRT_2;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = a.sqrt() * sin_omega * std::f32::consts::SQRT_2;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
        };

        Self {
            a0: n0 / d0,
            a1: n1 / d0,
            a2: n2 / d0,
            b1: d1 / d0,
            b2: d2 / d0,
        }
    }
}

/// Biquad filter state for a single channel
#[derive(Debug, Default, Clone)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let output = c.a0 * input + c.a1 * self.x1 + c.a2 * self.x2 - c.b1 * self.y1 - c.b2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Stereo biquad that redesigns itself only when its parameters change
#[derive(Debug, Clone)]
pub struct Biquad {
    filter_type: FilterType,
    sample_rate: f32,
    params: Option<(f32, f32, f32)>,
    coeffs: BiquadCoeffs,
    left: BiquadState,
    right: BiquadState,
}

impl Biquad {
    pub fn new(filter_type: FilterType, sample_rate: f32) -> Self {
        Self {
            filter_type,
            sample_rate,
            params: None,
            coeffs: BiquadCoeffs::UNITY,
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn set_filter_type(&mut self, filter_type: FilterType) {
        if filter_type != self.filter_type {
            self.filter_type = filter_type;
            self.params = None;
        }
    }

    pub fn process(&mut self, frames: &mut [f32], freq: f32, q: f32, gain_db: f32) {
        if self.params != Some((freq, q, gain_db)) {
            self.coeffs = BiquadCoeffs::design(self.filter_type, self.sample_rate, freq, q, gain_db);
            self.params = Some((freq, q, gain_db));
        }
        for frame in frames.chunks_exact_mut(2) {
            frame[0] = self.left.process(frame[0], &self.coeffs);
            frame[1] = self.right.process(frame[1], &self.coeffs);
        }
    }
}

/// Delay line with an internal feedback path
#[derive(Debug, Clone)]
pub struct DelayLine {
    sample_rate: f32,
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn new(max_delay_secs: f32, sample_rate: f32) -> Self {
        let len = (max_delay_secs.max(0.0) * sample_rate) as usize + 2;
        Self {
            sample_rate,
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write_pos: 0,
        }
    }

    #[inline]
    fn read(buffer: &[f32], pos: f32) -> f32 {
        let len = buffer.len();
        let i = pos.floor() as usize % len;
        let frac = pos.fract();
        buffer[i] * (1.0 - frac) + buffer[(i + 1) % len] * frac
    }

    /// Output is the delayed signal only
    pub fn process(&mut self, frames: &mut [f32], delay_secs: f32, feedback: f32) {
        let len = self.buffer_l.len();
        let delay = (delay_secs * self.sample_rate).clamp(1.0, (len - 2) as f32);
        let feedback = feedback.clamp(0.0, 0.95);

        for frame in frames.chunks_exact_mut(2) {
            let read_pos = (self.write_pos as f32 - delay).rem_euclid(len as f32);
            let delayed_l = Self::read(&self.buffer_l, read_pos);
            let delayed_r = Self::read(&self.buffer_r, read_pos);

            self.buffer_l[self.write_pos] = frame[0] + delayed_l * feedback;
            self.buffer_r[self.write_pos] = frame[1] + delayed_r * feedback;
            self.write_pos = (self.write_pos + 1) % len;

            frame[0] = delayed_l;
            frame[1] = delayed_r;
        }
    }
}

/// Stereo impulse of exponentially decaying noise
pub fn noise_impulse(sample_rate: f32, secs: f32, seed: u64) -> [Vec<f32>; 2] {
    let len = ((sample_rate * secs) as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut channel = || -> Vec<f32> {
        (0..len)
            .map(|i| {
                let decay = (1.0 - i as f32 / len as f32).powi(2);
                rng.gen_range(-1.0f32..1.0) * decay
            })
            .collect()
    };
    [channel(), channel()]
}

/// One channel of a uniformly partitioned overlap-save convolver
struct PartitionedChannel {
    /// Spectra of the impulse partitions
    partitions: Vec<Vec<Complex<f32>>>,
    /// Spectra of recent input blocks, newest at `head`
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    /// Previous and current input block
    input: Vec<f32>,
}

/// FFT convolution reverb
pub struct Convolver {
    block: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    channels: [PartitionedChannel; 2],
    buffer: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// `block` must equal the number of frames passed to [`process`](Self::process)
    pub fn new(impulse: [Vec<f32>; 2], block: usize) -> Self {
        let size = block * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let [left, right] = impulse;
        let mut channel = |ir: Vec<f32>| {
            let partitions: Vec<Vec<Complex<f32>>> = ir
                .chunks(block)
                .map(|chunk| {
                    let mut spectrum = vec![Complex::default(); size];
                    for (slot, &h) in spectrum.iter_mut().zip(chunk) {
                        *slot = Complex::new(h, 0.0);
                    }
                    forward.process_with_scratch(&mut spectrum, &mut scratch);
                    spectrum
                })
                .collect();
            let count = partitions.len();
            PartitionedChannel {
                partitions,
                history: vec![vec![Complex::default(); size]; count],
                head: 0,
                input: vec![0.0; size],
            }
        };
        let channels = [channel(left), channel(right)];

        Self {
            block,
            forward,
            inverse,
            channels,
            buffer: vec![Complex::default(); size],
            accumulator: vec![Complex::default(); size],
            scratch,
        }
    }

    pub fn process(&mut self, frames: &mut [f32]) {
        if frames.len() != self.block * 2 {
            return;
        }
        let block = self.block;
        let size = block * 2;
        let scale = 1.0 / size as f32;

        for (c, channel) in self.channels.iter_mut().enumerate() {
            if channel.partitions.is_empty() {
                continue;
            }
            channel.input.copy_within(block.., 0);
            for (i, frame) in frames.chunks_exact(2).enumerate() {
                channel.input[block + i] = frame[c];
            }

            for (slot, &x) in self.buffer.iter_mut().zip(&channel.input) {
                *slot = Complex::new(x, 0.0);
            }
            self.forward.process_with_scratch(&mut self.buffer, &mut self.scratch);
            let count = channel.history.len();
            channel.head = (channel.head + count - 1) % count;
            channel.history[channel.head].copy_from_slice(&self.buffer);

            self.accumulator.fill(Complex::default());
            for (p, partition) in channel.partitions.iter().enumerate() {
                let spectrum = &channel.history[(channel.head + p) % count];
                for ((acc, x), h) in self.accumulator.iter_mut().zip(spectrum).zip(partition) {
                    *acc += x * h;
                }
            }
            self.inverse.process_with_scratch(&mut self.accumulator, &mut self.scratch);

            for (i, frame) in frames.chunks_exact_mut(2).enumerate() {
                frame[c] = self.accumulator[block + i].re * scale;
            }
        }
    }
}

/// Feed-forward compressor with a soft knee and linked stereo detection
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f32,
    envelope: f32,
}

/// Compressor settings in Web Audio units (dB, ratio, seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub threshold: f32,
    pub knee: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            envelope: 1.0,
        }
    }

    /// Gain change in dB (zero or negative) for an input level
    pub fn gain_reduction_db(input_db: f32, p: &CompressorParams) -> f32 {
        let ratio = p.ratio.max(1.0);
        let knee = p.knee.max(0.0);
        if input_db < p.threshold - knee / 2.0 {
            0.0
        } else if input_db > p.threshold + knee / 2.0 {
            p.threshold + (input_db - p.threshold) / ratio - input_db
        } else {
            let x = input_db - (p.threshold - knee / 2.0);
            (1.0 / ratio - 1.0) * (x * x) / (2.0 * knee)
        }
    }

    pub fn process(&mut self, frames: &mut [f32], p: &CompressorParams) {
        let coeff = |secs: f32| (-1.0 / (self.sample_rate * secs.max(0.0001))).exp();
        let attack_coeff = coeff(p.attack);
        let release_coeff = coeff(p.release);

        for frame in frames.chunks_exact_mut(2) {
            let peak = frame[0].abs().max(frame[1].abs());
            let peak_db = if peak > 1e-10 { 20.0 * peak.log10() } else { -200.0 };
            let target = 10.0f32.powf(Self::gain_reduction_db(peak_db, p) / 20.0);

            let c = if target < self.envelope {
                attack_coeff
            } else {
                release_coeff
            };
            self.envelope = c * self.envelope + (1.0 - c) * target;

            frame[0] *= self.envelope;
            frame[1] *= self.envelope;
        }
    }
}

/// Spatial placement relative to a listener at the origin facing -z
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PannerParams {
    pub position: [f32; 3],
    pub orientation: [f32; 3],
}

pub const REF_DISTANCE: f32 = 1.0;
pub const MAX_DISTANCE: f32 = 20000.0;
pub const ROLLOFF_FACTOR: f32 = 1.0;
pub const CONE_INNER_DEG: f32 = 40.0;
pub const CONE_OUTER_DEG: f32 = 180.0;
pub const CONE_OUTER_GAIN: f32 = 0.7;

/// Equal-power panner with exponential distance and cone attenuation
#[derive(Debug, Clone, Copy, Default)]
pub struct Panner;

impl Panner {
    /// Azimuth in degrees, 0 ahead, positive to the right, folded into -90..=90
    pub fn azimuth(position: [f32; 3]) -> f32 {
        let [x, _, z] = position;
        if x == 0.0 && z == 0.0 {
            return 0.0;
        }
        let az = x.atan2(-z).to_degrees();
        if az > 90.0 {
            180.0 - az
        } else if az < -90.0 {
            -180.0 - az
        } else {
            az
        }
    }

    pub fn distance_gain(position: [f32; 3]) -> f32 {
        let distance = length(position).clamp(REF_DISTANCE, MAX_DISTANCE);
        (distance / REF_DISTANCE).powf(-ROLLOFF_FACTOR)
    }

    pub fn cone_gain(position: [f32; 3], orientation: [f32; 3]) -> f32 {
        let (o, d) = (length(orientation), length(position));
        if o == 0.0 || d == 0.0 {
            return 1.0;
        }
        let to_listener = position.map(|v| -v / d);
        let cos = orientation
            .iter()
            .zip(to_listener)
            .map(|(a, b)| a / o * b)
            .sum::<f32>()
            .clamp(-1.0, 1.0);
        let angle = cos.acos().to_degrees();

        let (inner, outer) = (CONE_INNER_DEG / 2.0, CONE_OUTER_DEG / 2.0);
        if angle <= inner {
            1.0
        } else if angle >= outer {
            CONE_OUTER_GAIN
        } else {
            let x = (angle - inner) / (outer - inner);
            1.0 + (CONE_OUTER_GAIN - 1.0) * x
        }
    }

    pub fn process(&mut self, frames: &mut [f32], p: &PannerParams) {
        let az = Self::azimuth(p.position);
        let gain = Self::distance_gain(p.position) * Self::cone_gain(p.position, p.orientation);
        let x = if az <= 0.0 { (az + 90.0) / 90.0 } else { az / 90.0 };
        let (gain_r, gain_l) = (x * PI / 2.0).sin_cos();

        for frame in frames.chunks_exact_mut(2) {
            let (l, r) = (frame[0], frame[1]);
            let (out_l, out_r) = if az <= 0.0 {
                (l + r * gain_l, r * gain_r)
            } else {
                (l * gain_l, r + l * gain_r)
            };
            frame[0] = out_l * gain;
            frame[1] = out_r * gain;
        }
    }
}

fn length(v: [f32; 3]) -> f32 {
    v.iter().map(|c| c * c).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (2.0 * PI * freq * i as f32 / sample_rate).sin();
                [s, s]
            })
            .collect()
    }

    fn peak(frames: &[f32]) -> f32 {
        frames.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let sr = 48000.0;
        let mut low = sine(100.0, sr, 4800);
        let mut high = sine(10000.0, sr, 4800);
        let mut a = Biquad::new(FilterType::LowPass, sr);
        let mut b = Biquad::new(FilterType::LowPass, sr);
        a.process(&mut low, 1000.0, 0.707, 0.0);
        b.process(&mut high, 1000.0, 0.707, 0.0);

        assert!(peak(&low[4800..]) > 0.9);
        assert!(peak(&high[4800..]) < 0.05);
    }

    #[test]
    fn test_flat_shelf_is_transparent() {
        let sr = 48000.0;
        let input = sine(200.0, sr, 256);
        let mut frames = input.clone();
        Biquad::new(FilterType::LowShelf, sr).process(&mut frames, 200.0, 1.0, 0.0);
        assert_eq!(frames, input);
    }

    #[test]
    fn test_peaking_boost() {
        let sr = 48000.0;
        let mut frames = sine(1000.0, sr, 9600);
        Biquad::new(FilterType::Peaking, sr).process(&mut frames, 1000.0, 1.0, 6.0);
        // +6 dB is about 2x
        let p = peak(&frames[9600..]);
        assert!((p - 2.0).abs() < 0.1, "peak {p}");
    }

    #[test]
    fn test_delay_line() {
        let mut delay = DelayLine::new(1.0, 1000.0);
        let mut frames = vec![0.0; 64];
        frames[0] = 1.0;
        frames[1] = 1.0;
        delay.process(&mut frames, 0.01, 0.5);

        // 10 frames later, then again at half level
        assert_eq!(frames[20], 1.0);
        assert_eq!(frames[40], 0.5);
        assert_eq!(frames[0], 0.0);
    }

    #[test]
    fn test_convolver_with_unit_impulse() {
        let block = 128;
        let mut impulse = vec![0.0; 300];
        impulse[0] = 1.0;
        let mut convolver = Convolver::new([impulse.clone(), impulse], block);

        let input: Vec<f32> = (0..block * 2).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut frames = input.clone();
        convolver.process(&mut frames);
        for (a, b) in frames.iter().zip(&input) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_convolver_tail_spans_blocks() {
        let block = 128;
        let mut impulse = vec![0.0; 300];
        impulse[200] = 0.5;
        let mut convolver = Convolver::new([impulse.clone(), impulse], block);

        let mut first = vec![0.0; block * 2];
        first[0] = 1.0;
        first[1] = 1.0;
        convolver.process(&mut first);
        assert!(peak(&first) < 1e-4);

        let mut second = vec![0.0; block * 2];
        convolver.process(&mut second);
        let frame = 200 - block;
        assert!((second[frame * 2] - 0.5).abs() < 1e-4);
        assert!((second[frame * 2 + 1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_noise_impulse_decays() {
        let [l, r] = noise_impulse(1000.0, IMPULSE_SECS, 1);
        assert_eq!(l.len(), 500);
        assert_ne!(l, r);
        assert!(peak(&l[450..]) < peak(&l[..50]));
    }

    #[test]
    fn test_gain_reduction_curve() {
        let p = CompressorParams {
            threshold: -24.0,
            knee: 12.0,
            ratio: 4.0,
            attack: 0.005,
            release: 0.2,
        };
        assert_eq!(Compressor::gain_reduction_db(-40.0, &p), 0.0);
        // 12 dB over the threshold at 4:1 keeps 3 dB of it
        assert!((Compressor::gain_reduction_db(-12.0, &p) + 9.0).abs() < 1e-4);
        let knee = Compressor::gain_reduction_db(-24.0, &p);
        assert!(knee < 0.0 && knee > -9.0);
    }

    #[test]
    fn test_compressor_reduces_loud_input() {
        let p = CompressorParams {
            threshold: -24.0,
            knee: 12.0,
            ratio: 4.0,
            attack: 0.005,
            release: 0.2,
        };
        let mut frames = vec![0.9; 48000 * 2];
        Compressor::new(48000.0).process(&mut frames, &p);
        assert!(frames[frames.len() - 1] < 0.3);
    }

    #[test]
    fn test_panner_azimuth_and_gains() {
        assert_eq!(Panner::azimuth([0.0, 0.0, -2.0]), 0.0);
        assert!((Panner::azimuth([2.0, 0.0, 0.0]) - 90.0).abs() < 1e-4);
        assert!((Panner::azimuth([-1.0, 0.0, 1.0]) + 45.0).abs() < 1e-3);
        assert!((Panner::distance_gain([0.0, 0.0, -4.0]) - 0.25).abs() < 1e-6);
        assert_eq!(Panner::distance_gain([0.0, 0.0, 0.5]), 1.0);

        // Facing the listener, facing away
        assert_eq!(Panner::cone_gain([0.0, 0.0, -2.0], [0.0, 0.0, 1.0]), 1.0);
        assert!((Panner::cone_gain([0.0, 0.0, -2.0], [0.0, 0.0, -1.0]) - CONE_OUTER_GAIN).abs() < 1e-6);
    }

    #[test]
    fn test_panner_hard_left() {
        let mut frames = vec![1.0; 8];
        let p = PannerParams {
            position: [-1.0, 0.0, 0.0],
            orientation: [0.0, 0.0, 0.0],
        };
        Panner.process(&mut frames, &p);
        assert!((frames[0] - 2.0).abs() < 1e-5);
        assert!(frames[1].abs() < 1e-5);
    }
}
