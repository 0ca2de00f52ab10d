//! Drop detection on the playing chain
//!
//! A drop is a sudden jump in bass while the track is already loud. Once
//! detected, the detector stays latched until the bass falls back, and no
//! new drop is reported for [`DROP_COOLDOWN_SECS`] on the engine clock.

use autodj_analysis::{energy_in_band, FrequencySnapshot};

use crate::engine::AudioEngineHandle;
use crate::graph::{Control, EffectGraph};
use crate::transition::BandEnergy;

/// Minimum bass (and total) rise between snapshots
pub const DROP_THRESHOLD: f32 = 0.4;

/// Quiet period after a drop
pub const DROP_COOLDOWN_SECS: f64 = 10.0;

/// How long the drop effect holds before reverting
pub const DROP_EFFECT_SECS: f64 = 3.0;

const LOUD_BAND: f32 = 0.7;
const RELEASE_DELTA: f32 = -0.2;
const ATTACK_SECS: f64 = 0.1;
const REVERT_SECS: f64 = 0.5;

/// Bass 20-250 Hz, mid 250-2000 Hz, high 2000-20000 Hz
pub fn band_energy(snapshot: &FrequencySnapshot) -> BandEnergy {
    BandEnergy {
        bass: energy_in_band(snapshot, 20.0, 250.0),
        mid: energy_in_band(snapshot, 250.0, 2000.0),
        high: energy_in_band(snapshot, 2000.0, 20000.0),
    }
}

#[derive(Debug, Default)]
pub struct DropDetector {
    previous: BandEnergy,
    latched: bool,
    last_drop_at: Option<f64>,
}

impl DropDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently observed band energy
    pub fn energy(&self) -> BandEnergy {
        self.previous
    }

    pub fn observe(&mut self, snapshot: &FrequencySnapshot, now: f64) -> bool {
        self.observe_energy(band_energy(snapshot), now)
    }

    /// Feed one measurement; true when it is a new drop
    pub fn observe_energy(&mut self, energy: BandEnergy, now: f64) -> bool {
        let bass_delta = energy.bass - self.previous.bass;
        let rise = bass_delta + (energy.mid - self.previous.mid) + (energy.high - self.previous.high);
        self.previous = energy;

        if self.last_drop_at.is_some_and(|at| now - at < DROP_COOLDOWN_SECS) {
            return false;
        }

        let loud = energy.bass > LOUD_BAND || energy.mid > LOUD_BAND;
        if !self.latched && bass_delta > DROP_THRESHOLD && loud && rise > DROP_THRESHOLD {
            self.latched = true;
            self.last_drop_at = Some(now);
            return true;
        }
        if self.latched && bass_delta < RELEASE_DELTA {
            self.latched = false;
        }
        false
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Open up the chain: more reverb and delay, a resonant lowpass sweep
pub(crate) fn apply_drop_effect(engine: &mut dyn AudioEngineHandle, graph: &EffectGraph, now: f64) {
    let targets = [
        (Control::ReverbWet, 0.5),
        (Control::Dry, 0.8),
        (Control::DelayTime, 0.25),
        (Control::DelayFeedback, 0.4),
        (Control::DelayWet, 0.4),
    ];
    for (control, target) in targets {
        graph.ramp(engine, control, target, ATTACK_SECS, now);
    }
    apply_drop_sweep(engine, graph, now);
}

/// The lowpass sweep alone; the sends stay with a running transition
pub(crate) fn apply_drop_sweep(engine: &mut dyn AudioEngineHandle, graph: &EffectGraph, now: f64) {
    graph.ramp_from(engine, Control::SweepFrequency, 200.0, 8000.0, 0.5, now);
    graph.ramp_to_at(engine, Control::SweepFrequency, 2000.0, now + 1.5);
    graph.ramp_from(engine, Control::SweepQ, 1.0, 8.0, 0.5, now);
    graph.ramp_to_at(engine, Control::SweepQ, 1.0, now + 1.5);
}

pub(crate) fn revert_drop_effect(engine: &mut dyn AudioEngineHandle, graph: &EffectGraph, now: f64) {
    let targets = [
        (Control::ReverbWet, 0.3),
        (Control::Dry, 1.0),
        (Control::DelayTime, 0.2),
        (Control::DelayFeedback, 0.1),
        (Control::DelayWet, 0.1),
    ];
    for (control, target) in targets {
        graph.ramp(engine, control, target, REVERT_SECS, now);
    }
    revert_drop_sweep(engine, graph, now);
}

pub(crate) fn revert_drop_sweep(engine: &mut dyn AudioEngineHandle, graph: &EffectGraph, now: f64) {
    graph.ramp(engine, Control::SweepFrequency, 20000.0, REVERT_SECS, now);
    graph.ramp(engine, Control::SweepQ, 1.0, REVERT_SECS, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedEngine;

    const QUIET: BandEnergy = BandEnergy {
        bass: 0.1,
        mid: 0.1,
        high: 0.1,
    };
    const LOUD: BandEnergy = BandEnergy {
        bass: 0.9,
        mid: 0.8,
        high: 0.6,
    };

    #[test]
    fn test_band_energy() {
        let snapshot = FrequencySnapshot::from_magnitudes(vec![0.5; 1024], 44100);
        let e = band_energy(&snapshot);
        assert!((e.bass - 0.5).abs() < 1e-6);
        assert!((e.mid - 0.5).abs() < 1e-6);
        assert!((e.high - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detects_jump() {
        let mut detector = DropDetector::new();
        assert!(!detector.observe_energy(QUIET, 0.0));
        assert!(detector.observe_energy(LOUD, 0.1));
        assert_eq!(detector.energy(), LOUD);
    }

    #[test]
    fn test_cooldown() {
        let mut detector = DropDetector::new();
        detector.observe_energy(QUIET, 0.0);
        assert!(detector.observe_energy(LOUD, 1.0));

        // Second spike five seconds later is ignored
        detector.observe_energy(QUIET, 5.0);
        assert!(!detector.observe_energy(LOUD, 6.0));

        // After the cooldown the latch releases on a fall and re-arms
        detector.observe_energy(QUIET, 11.5);
        assert!(detector.observe_energy(LOUD, 12.0));
    }

    #[test]
    fn test_latch_needs_release() {
        let mut detector = DropDetector::new();
        detector.observe_energy(QUIET, 0.0);
        assert!(detector.observe_energy(LOUD, 1.0));

        // Bass eases off slowly, never falling far enough in one step to release
        for (i, bass) in [0.75, 0.6, 0.45, 0.3].into_iter().enumerate() {
            let easing = BandEnergy {
                bass,
                mid: 0.1,
                high: 0.1,
            };
            assert!(!detector.observe_energy(easing, 11.0 + i as f64));
        }
        assert!(!detector.observe_energy(LOUD, 15.0));

        // A sharp fall releases the latch
        detector.observe_energy(QUIET, 16.0);
        assert!(detector.observe_energy(LOUD, 17.0));
    }

    #[test]
    fn test_quiet_rise_is_not_a_drop() {
        let mut detector = DropDetector::new();
        let soft = BandEnergy {
            bass: 0.6,
            mid: 0.5,
            high: 0.2,
        };
        assert!(!detector.observe_energy(soft, 0.0));
    }

    #[test]
    fn test_drop_effect_automation() {
        let mut engine = SimulatedEngine::new();
        let source = engine.create_source("a.mp3").unwrap();
        let graph = EffectGraph::build(&mut engine, source);
        let value = |engine: &SimulatedEngine, control: Control, at: f64| {
            let param = graph.chain().unwrap().param(control).unwrap();
            engine.param_value_at(param, at).unwrap()
        };

        apply_drop_effect(&mut engine, &graph, 10.0);
        assert_eq!(value(&engine, Control::SweepFrequency, 10.0), 200.0);
        assert_eq!(value(&engine, Control::SweepFrequency, 10.5), 8000.0);
        assert_eq!(value(&engine, Control::SweepFrequency, 11.5), 2000.0);
        assert_eq!(value(&engine, Control::SweepQ, 10.5), 8.0);
        assert!((value(&engine, Control::ReverbWet, 10.1) - 0.5).abs() < 1e-6);

        revert_drop_effect(&mut engine, &graph, 13.0);
        assert_eq!(value(&engine, Control::SweepFrequency, 13.0), 2000.0);
        assert_eq!(value(&engine, Control::SweepFrequency, 13.5), 20000.0);
        assert!((value(&engine, Control::DelayWet, 13.5) - 0.1).abs() < 1e-6);
        assert_eq!(value(&engine, Control::Dry, 13.5), 1.0);
    }
}
