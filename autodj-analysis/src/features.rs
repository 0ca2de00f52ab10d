//! Banded energy and scalar spectral features
//!
//! All functions here are pure: they read a [`FrequencySnapshot`] and hold
//! no state. Any smoothing or history belongs to the caller.

use crate::spectrum::FrequencySnapshot;

/// Fixed analysis bands in Hz (low, high)
pub const SUB_BASS: (f32, f32) = (20.0, 60.0);
pub const BASS: (f32, f32) = (60.0, 250.0);
pub const LOW_MID: (f32, f32) = (250.0, 500.0);
pub const MID: (f32, f32) = (500.0, 2000.0);
pub const HIGH_MID: (f32, f32) = (2000.0, 4000.0);
pub const HIGH: (f32, f32) = (4000.0, 12000.0);
pub const VERY_HIGH: (f32, f32) = (12000.0, 20000.0);

/// Fraction of spectral energy below the rolloff frequency
pub const ROLLOFF_THRESHOLD: f32 = 0.85;

/// Energy per named band, each 0.0 - 1.0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyLevels {
    pub sub_bass: f32,
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub high: f32,
    pub very_high: f32,
}

impl EnergyLevels {
    /// Band values in ascending frequency order
    pub fn as_array(&self) -> [f32; 7] {
        [
            self.sub_bass,
            self.bass,
            self.low_mid,
            self.mid,
            self.high_mid,
            self.high,
            self.very_high,
        ]
    }

    /// Mean energy across all bands
    pub fn average(&self) -> f32 {
        self.as_array().iter().sum::<f32>() / 7.0
    }

    /// Population variance across bands
    pub fn variance(&self) -> f32 {
        let values = self.as_array();
        let mean = self.average();
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32
    }

    /// Uniform level in every band (handy for tests and placeholders)
    pub fn uniform(level: f32) -> Self {
        Self {
            sub_bass: level,
            bass: level,
            low_mid: level,
            mid: level,
            high_mid: level,
            high: level,
            very_high: level,
        }
    }
}

/// Average normalized magnitude over the bins covering `min_hz..=max_hz`
///
/// The bin range is clamped to valid indices; an empty or inverted range
/// yields 0.0.
pub fn energy_in_band(snapshot: &FrequencySnapshot, min_hz: f32, max_hz: f32) -> f32 {
    let bins = snapshot.bin_count();
    if bins == 0 || snapshot.sample_rate == 0 {
        return 0.0;
    }

    let nyquist = snapshot.nyquist();
    let to_index = |hz: f32| -> usize {
        let idx = (hz.max(0.0) / nyquist * bins as f32).floor() as usize;
        idx.min(bins - 1)
    };

    let low = to_index(min_hz);
    let high = to_index(max_hz);
    if high < low || min_hz >= nyquist {
        return 0.0;
    }

    let slice = &snapshot.magnitudes[low..=high];
    let sum: f32 = slice.iter().sum();
    (sum / slice.len() as f32).clamp(0.0, 1.0)
}

/// Energy in each of the seven fixed bands
pub fn banded_energies(snapshot: &FrequencySnapshot) -> EnergyLevels {
    let band = |(lo, hi): (f32, f32)| energy_in_band(snapshot, lo, hi);
    EnergyLevels {
        sub_bass: band(SUB_BASS),
        bass: band(BASS),
        low_mid: band(LOW_MID),
        mid: band(MID),
        high_mid: band(HIGH_MID),
        high: band(HIGH),
        very_high: band(VERY_HIGH),
    }
}

/// Magnitude-weighted mean frequency in Hz
pub fn spectral_centroid(snapshot: &FrequencySnapshot) -> f32 {
    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (i, &m) in snapshot.magnitudes.iter().enumerate() {
        weighted += snapshot.bin_frequency(i) * m;
        total += m;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Frequency in Hz below which [`ROLLOFF_THRESHOLD`] of the spectral energy lies
pub fn spectral_rolloff(snapshot: &FrequencySnapshot) -> f32 {
    let total: f32 = snapshot.magnitudes.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let target = total * ROLLOFF_THRESHOLD;
    let mut running = 0.0f32;
    for (i, &m) in snapshot.magnitudes.iter().enumerate() {
        running += m;
        if running >= target {
            return snapshot.bin_frequency(i);
        }
    }
    snapshot.nyquist()
}

/// Fraction of adjacent waveform samples that change sign (0.0 - 1.0)
pub fn zero_crossing_rate(snapshot: &FrequencySnapshot) -> f32 {
    let wave = &snapshot.waveform;
    if wave.len() < 2 {
        return 0.0;
    }
    let crossings = wave
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (wave.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1024 bins at 48kHz: bin width ~23.4 Hz
    fn snapshot_with(f: impl Fn(f32) -> f32) -> FrequencySnapshot {
        let mut snap = FrequencySnapshot::from_magnitudes(vec![0.0; 1024], 48000);
        for i in 0..1024 {
            let hz = snap.bin_frequency(i);
            snap.magnitudes[i] = f(hz);
        }
        snap
    }

    #[test]
    fn test_energy_in_band_average() {
        let snap = snapshot_with(|hz| if hz < 250.0 { 0.8 } else { 0.1 });
        let bass = energy_in_band(&snap, 60.0, 200.0);
        assert!((bass - 0.8).abs() < 1e-5);
        let high = energy_in_band(&snap, 4000.0, 12000.0);
        assert!((high - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_energy_in_band_clamps_range() {
        let snap = snapshot_with(|_| 0.5);
        // Above Nyquist is clamped to the last bin
        let e = energy_in_band(&snap, 20000.0, 40000.0);
        assert!((e - 0.5).abs() < 1e-5);
        // Entirely above Nyquist
        assert_eq!(energy_in_band(&snap, 30000.0, 40000.0), 0.0);
        // Inverted
        assert_eq!(energy_in_band(&snap, 2000.0, 100.0), 0.0);
    }

    #[test]
    fn test_energy_empty_snapshot() {
        let snap = FrequencySnapshot::from_magnitudes(Vec::new(), 48000);
        assert_eq!(energy_in_band(&snap, 20.0, 200.0), 0.0);
        assert_eq!(banded_energies(&snap), EnergyLevels::default());
    }

    #[test]
    fn test_banded_energies() {
        let snap = snapshot_with(|hz| if hz < 500.0 { 0.9 } else { 0.2 });
        let levels = banded_energies(&snap);
        assert!(levels.bass > 0.85);
        assert!(levels.high < 0.25);
        assert!(levels.very_high < 0.25);
    }

    #[test]
    fn test_centroid_and_rolloff() {
        // Energy concentrated at low frequencies
        let snap = snapshot_with(|hz| if hz < 1000.0 { 1.0 } else { 0.0 });
        let centroid = spectral_centroid(&snap);
        assert!(centroid > 400.0 && centroid < 600.0, "centroid {}", centroid);
        let rolloff = spectral_rolloff(&snap);
        assert!(rolloff < 1000.0 && rolloff > 700.0, "rolloff {}", rolloff);
    }

    #[test]
    fn test_rolloff_silence() {
        let snap = snapshot_with(|_| 0.0);
        assert_eq!(spectral_rolloff(&snap), 0.0);
        assert_eq!(spectral_centroid(&snap), 0.0);
    }

    #[test]
    fn test_zero_crossing_rate() {
        let mut snap = FrequencySnapshot::from_magnitudes(vec![0.0; 16], 48000);
        snap.waveform = vec![1.0, -1.0, 1.0, -1.0, 1.0];
        assert!((zero_crossing_rate(&snap) - 1.0).abs() < 1e-6);
        snap.waveform = vec![0.5; 10];
        assert_eq!(zero_crossing_rate(&snap), 0.0);
    }

    #[test]
    fn test_levels_variance() {
        assert_eq!(EnergyLevels::uniform(0.4).variance(), 0.0);
        let levels = EnergyLevels {
            bass: 1.0,
            ..Default::default()
        };
        assert!(levels.variance() > 0.1);
    }
}
