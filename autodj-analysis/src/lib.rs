//! Audio analysis for autodj
//!
//! Provides:
//! - FFT frequency snapshots from live sample blocks
//! - Banded energy and spectral features (centroid, rolloff, ZCR)
//! - Offline BPM detection
//! - A heuristic advisor for EQ/effect suggestions and dynamics tracking

pub mod advisor;
pub mod features;
mod bpm;
mod spectrum;

pub use advisor::{
    AudioCharacteristics, EffectSpec, FilterSpec, FilterType, HeuristicAdvisor, LearningSnapshot,
    Thresholds, TrackHints,
};
pub use bpm::BpmDetector;
pub use features::{
    banded_energies, energy_in_band, spectral_centroid, spectral_rolloff, zero_crossing_rate,
    EnergyLevels,
};
pub use spectrum::{FrequencySnapshot, SpectrumAnalyzer, DEFAULT_FFT_SIZE};
