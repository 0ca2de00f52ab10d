//! Offline BPM estimation from decoded audio
//!
//! Amplitude-envelope peak picking: the envelope is a moving average of
//! the rectified signal, peaks above `mean + 1.5σ` that are at least 200ms
//! apart count as beats, and the most common inter-beat tempo wins.

use std::collections::HashMap;

/// Length of each analysis chunk in seconds
const CHUNK_SECS: usize = 30;

/// Minimum spacing between detected peaks in seconds
const MIN_PEAK_DISTANCE_SECS: f32 = 0.2;

/// Threshold above the envelope mean, in standard deviations
const PEAK_THRESHOLD_SIGMA: f64 = 1.5;

/// Tempo range intervals are folded into
const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 180.0;

/// BPM detector for fully decoded tracks
pub struct BpmDetector {
    sample_rate: u32,
    channels: usize,
}

impl BpmDetector {
    /// Create a detector for interleaved audio with the given layout
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1) as usize,
        }
    }

    /// Estimate the tempo of an interleaved buffer.
    ///
    /// Returns `None` when no stable beat is found (silence, too short).
    pub fn detect(&self, samples: &[f32]) -> Option<u32> {
        if self.sample_rate == 0 {
            return None;
        }

        let mono = self.downmix(samples);
        let chunk_len = self.sample_rate as usize * CHUNK_SECS;

        let mut votes: HashMap<u32, usize> = HashMap::new();
        for chunk in mono.chunks(chunk_len) {
            let envelope = self.envelope(chunk);
            let peaks = self.find_peaks(&envelope);
            for pair in peaks.windows(2) {
                let interval = (pair[1] - pair[0]) as f32 / self.sample_rate as f32;
                if interval <= 0.0 {
                    continue;
                }
                let tempo = fold_tempo(60.0 / interval).round() as u32;
                *votes.entry(tempo).or_insert(0) += 1;
            }
        }

        // Ties resolve to the slower tempo so results are deterministic
        let best = votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(tempo, _)| tempo);

        tracing::debug!(?best, "bpm detection finished");
        best
    }

    fn downmix(&self, samples: &[f32]) -> Vec<f32> {
        if self.channels == 1 {
            return samples.to_vec();
        }
        samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    /// Moving average of |x| over a window of ±10ms
    fn envelope(&self, signal: &[f32]) -> Vec<f32> {
        let half = (self.sample_rate as usize / 100).max(1);
        let mut prefix = Vec::with_capacity(signal.len() + 1);
        prefix.push(0.0f64);
        let mut acc = 0.0f64;
        for &s in signal {
            acc += s.abs() as f64;
            prefix.push(acc);
        }

        (0..signal.len())
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(signal.len());
                ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32
            })
            .collect()
    }

    fn find_peaks(&self, envelope: &[f32]) -> Vec<usize> {
        if envelope.len() < 3 {
            return Vec::new();
        }

        let n = envelope.len() as f64;
        let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = envelope
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let threshold = (mean + PEAK_THRESHOLD_SIGMA * variance.sqrt()) as f32;
        if threshold <= 0.0 {
            return Vec::new();
        }

        let min_distance = (MIN_PEAK_DISTANCE_SECS * self.sample_rate as f32) as usize;
        let mut peaks: Vec<usize> = Vec::new();

        for i in 1..envelope.len() - 1 {
            let v = envelope[i];
            if v > threshold && v >= envelope[i - 1] && v >= envelope[i + 1] {
                match peaks.last() {
                    Some(&last) if i - last < min_distance => {}
                    _ => peaks.push(i),
                }
            }
        }

        peaks
    }
}

/// Fold a tempo into the 60-180 BPM range by octaves
fn fold_tempo(mut bpm: f32) -> f32 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return MIN_BPM;
    }
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm > MAX_BPM {
        bpm /= 2.0;
    }
    bpm
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn click_track(bpm: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let total = (sample_rate as f32 * secs) as usize;
        let beat = (60.0 / bpm * sample_rate as f32) as usize;
        let burst = sample_rate as usize / 100;
        (0..total)
            .map(|i| {
                if i % beat < burst {
                    (2.0 * PI * 1000.0 * i as f32 / sample_rate as f32).sin()
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn test_detects_click_track() {
        let detector = BpmDetector::new(22050, 1);
        let samples = click_track(120.0, 22050, 10.0);
        assert_eq!(detector.detect(&samples), Some(120));
    }

    #[test]
    fn test_detects_stereo_input() {
        let detector = BpmDetector::new(22050, 2);
        let mono = click_track(125.0, 22050, 8.0);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let bpm = detector.detect(&stereo).unwrap();
        assert!((124..=126).contains(&bpm), "got {}", bpm);
    }

    #[test]
    fn test_silence_has_no_tempo() {
        let detector = BpmDetector::new(22050, 1);
        assert_eq!(detector.detect(&vec![0.0; 22050 * 5]), None);
    }

    #[test]
    fn test_fold_tempo() {
        assert_eq!(fold_tempo(240.0), 120.0);
        assert_eq!(fold_tempo(45.0), 90.0);
        assert_eq!(fold_tempo(128.0), 128.0);
        assert_eq!(fold_tempo(0.0), MIN_BPM);
    }
}
