//! Short-term dynamics of the playing track
//!
//! A bounded history of banded energies drives per-band trend estimation
//! (least-squares slope) and detection of structural events between the two
//! most recent snapshots.

use std::collections::VecDeque;

use super::{EffectSpec, FilterSpec, FilterType};
use crate::features::{banded_energies, EnergyLevels};
use crate::spectrum::FrequencySnapshot;

/// Snapshots kept per analysed track
pub const HISTORY_CAPACITY: usize = 20;

/// Minimum history before trends or events are reported
const MIN_HISTORY: usize = 3;

/// Slope magnitude separating a trend from noise
const TREND_SLOPE: f32 = 0.05;

/// Direction of a band's energy over the history window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

impl Trend {
    fn from_slope(slope: f32) -> Self {
        if slope > TREND_SLOPE {
            Trend::Increasing
        } else if slope < -TREND_SLOPE {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

/// Trends for the bands the rules care about, plus window averages
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendSet {
    pub bass: Trend,
    pub mid: Trend,
    pub high: Trend,
    pub average: EnergyLevels,
}

/// Structural event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyChangeKind {
    Drop,
    BuildUp,
    Breakdown,
    Transition,
}

/// A detected structural event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyChange {
    pub kind: EnergyChangeKind,
    /// 0.0 - 1.0
    pub intensity: f32,
    /// Playback second the event was observed at
    pub at: f64,
}

/// A filter to apply at an absolute playback time for a while
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedFilterSpec {
    pub filter: FilterSpec,
    pub apply_at: f64,
    pub duration: f64,
}

/// Effect sends, optionally timed when triggered by an event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEffectSpec {
    pub effects: EffectSpec,
    pub apply_at: Option<f64>,
    pub duration: Option<f64>,
}

impl Default for TimedEffectSpec {
    fn default() -> Self {
        Self {
            effects: EffectSpec::default(),
            apply_at: None,
            duration: None,
        }
    }
}

/// Result of one dynamics analysis step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicsAnalysis {
    pub filters: Vec<TimedFilterSpec>,
    pub effects: TimedEffectSpec,
    pub trends: TrendSet,
    pub changes: Vec<EnergyChange>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    at: f64,
    energy: EnergyLevels,
}

/// Rolling dynamics history for the currently playing track
#[derive(Debug, Default)]
pub struct DynamicsTracker {
    history: VecDeque<Segment>,
}

impl DynamicsTracker {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Push a snapshot and derive timed filters/effects
    pub fn analyze(
        &mut self,
        snapshot: &FrequencySnapshot,
        current_time: f64,
        _song_duration: f64,
    ) -> DynamicsAnalysis {
        self.push(current_time, banded_energies(snapshot))
    }

    /// Push already-banded energy (used by `analyze` and tests)
    pub fn push(&mut self, current_time: f64, energy: EnergyLevels) -> DynamicsAnalysis {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Segment {
            at: current_time,
            energy,
        });

        if self.history.len() < MIN_HISTORY {
            return DynamicsAnalysis::default();
        }

        let trends = self.trends();
        let changes = self.latest_change().into_iter().collect::<Vec<_>>();
        DynamicsAnalysis {
            filters: dynamic_filters(&trends, &changes, current_time),
            effects: dynamic_effects(&trends, &changes, current_time),
            trends,
            changes,
        }
    }

    fn trends(&self) -> TrendSet {
        let n = self.history.len() as f32;
        let mut sums = [0.0f32; 7];
        for seg in &self.history {
            for (s, v) in sums.iter_mut().zip(seg.energy.as_array()) {
                *s += v;
            }
        }
        let avg = |i: usize| sums[i] / n;
        let average = EnergyLevels {
            sub_bass: avg(0),
            bass: avg(1),
            low_mid: avg(2),
            mid: avg(3),
            high_mid: avg(4),
            high: avg(5),
            very_high: avg(6),
        };

        TrendSet {
            bass: Trend::from_slope(self.slope(|e| e.bass)),
            mid: Trend::from_slope(self.slope(|e| e.mid)),
            high: Trend::from_slope(self.slope(|e| e.high)),
            average,
        }
    }

    /// Least-squares slope of a band against history index
    fn slope(&self, band: impl Fn(&EnergyLevels) -> f32) -> f32 {
        let n = self.history.len() as f32;
        let (mut sx, mut sy, mut sxy, mut sxx) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for (i, seg) in self.history.iter().enumerate() {
            let x = i as f32;
            let y = band(&seg.energy);
            sx += x;
            sy += y;
            sxy += x * y;
            sxx += x * x;
        }
        let denom = n * sxx - sx * sx;
        if denom.abs() < f32::EPSILON {
            0.0
        } else {
            (n * sxy - sx * sy) / denom
        }
    }

    /// Classify the step between the two newest snapshots
    fn latest_change(&self) -> Option<EnergyChange> {
        let len = self.history.len();
        let cur = self.history.get(len - 1)?;
        let prev = self.history.get(len.checked_sub(2)?)?;

        let bass = cur.energy.bass - prev.energy.bass;
        let mid = cur.energy.mid - prev.energy.mid;
        let high = cur.energy.high - prev.energy.high;
        let signed = bass + mid + high;
        let swing = bass.abs() + mid.abs() + high.abs();

        let (kind, intensity) = if bass > 0.3 && cur.energy.bass > 0.7 {
            (EnergyChangeKind::Drop, (bass * 2.0).min(1.0))
        } else if mid > 0.15 && high > 0.15 {
            (EnergyChangeKind::BuildUp, (mid + high).min(1.0))
        } else if signed < -0.4 {
            (EnergyChangeKind::Breakdown, signed.abs().min(1.0))
        } else if swing > 0.3 {
            (EnergyChangeKind::Transition, swing.min(1.0))
        } else {
            return None;
        };

        Some(EnergyChange {
            kind,
            intensity,
            at: cur.at,
        })
    }
}

fn timed(filter: FilterSpec, apply_at: f64, duration: f64) -> TimedFilterSpec {
    TimedFilterSpec {
        filter,
        apply_at,
        duration,
    }
}

fn dynamic_filters(trends: &TrendSet, changes: &[EnergyChange], now: f64) -> Vec<TimedFilterSpec> {
    let mut filters = Vec::new();

    if trends.bass == Trend::Increasing && trends.mid != Trend::Increasing {
        filters.push(timed(
            FilterSpec::new(FilterType::LowShelf, 150.0, 3.0),
            now + 0.5,
            4.0,
        ));
    }
    if trends.high == Trend::Decreasing && trends.average.high < 0.5 {
        filters.push(timed(
            FilterSpec::new(FilterType::HighShelf, 8000.0, 2.0),
            now + 0.5,
            3.0,
        ));
    }

    for change in changes {
        let i = change.intensity;
        match change.kind {
            EnergyChangeKind::BuildUp => {
                filters.push(timed(
                    FilterSpec::new(FilterType::HighShelf, 4000.0, 2.0 * i),
                    now + 0.2,
                    2.0,
                ));
                filters.push(timed(
                    FilterSpec::new(FilterType::Peaking, 1000.0, 1.5 * i).with_q(1.0),
                    now + 0.5,
                    2.0,
                ));
            }
            EnergyChangeKind::Drop => {
                filters.push(timed(
                    FilterSpec::new(FilterType::LowShelf, 100.0, 4.0 * i),
                    now + 0.1,
                    2.5,
                ));
                filters.push(timed(
                    FilterSpec::new(FilterType::Peaking, 800.0, -2.0 * i).with_q(1.0),
                    now + 0.1,
                    2.0,
                ));
            }
            EnergyChangeKind::Breakdown => {
                filters.push(timed(
                    FilterSpec::new(FilterType::HighShelf, 6000.0, 2.0 * i),
                    now + 0.3,
                    3.0,
                ));
                filters.push(timed(
                    FilterSpec::new(FilterType::LowShelf, 200.0, -1.5 * i),
                    now + 0.3,
                    3.0,
                ));
            }
            EnergyChangeKind::Transition => {
                filters.push(timed(
                    FilterSpec::new(FilterType::Peaking, 2000.0, 3.0 * i).with_q(2.0),
                    now + 0.2,
                    1.5,
                ));
            }
        }
    }

    filters
}

fn dynamic_effects(trends: &TrendSet, changes: &[EnergyChange], now: f64) -> TimedEffectSpec {
    let mut spec = TimedEffectSpec::default();
    let fx = &mut spec.effects;

    if trends.high == Trend::Increasing && trends.mid == Trend::Increasing {
        fx.reverb = 0.15;
    } else if trends.bass == Trend::Decreasing && trends.mid == Trend::Decreasing {
        fx.reverb = 0.3;
    }

    for change in changes {
        let (apply_in, duration) = match change.kind {
            EnergyChangeKind::BuildUp => {
                fx.delay = 0.2;
                fx.feedback = 0.3 + 0.2 * change.intensity;
                fx.delay_time_secs = 0.3;
                (0.2, 2.0)
            }
            EnergyChangeKind::Drop => {
                fx.reverb = 0.1;
                fx.delay = 0.05;
                fx.feedback = 0.1;
                (0.1, 2.0)
            }
            EnergyChangeKind::Breakdown => {
                fx.reverb = 0.4;
                fx.delay = 0.15;
                fx.delay_time_secs = 0.4;
                fx.feedback = 0.25;
                (0.3, 3.0)
            }
            EnergyChangeKind::Transition => {
                fx.delay = 0.25;
                fx.delay_time_secs = 0.2;
                fx.feedback = 0.35;
                (0.2, 1.5)
            }
        };
        spec.apply_at = Some(now + apply_in);
        spec.duration = Some(duration);
    }

    spec
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(bass: f32, mid: f32, high: f32) -> EnergyLevels {
        EnergyLevels {
            bass,
            mid,
            high,
            ..Default::default()
        }
    }

    #[test]
    fn test_needs_three_entries() {
        let mut tracker = DynamicsTracker::new();
        assert_eq!(tracker.push(0.0, with(0.1, 0.1, 0.1)), DynamicsAnalysis::default());
        let out = tracker.push(1.0, with(0.9, 0.1, 0.1));
        assert!(out.changes.is_empty());
        assert!(out.filters.is_empty());
        assert_eq!(out.effects.apply_at, None);
    }

    #[test]
    fn test_history_bounded() {
        let mut tracker = DynamicsTracker::new();
        for i in 0..50 {
            tracker.push(i as f64, EnergyLevels::uniform(0.5));
        }
        assert_eq!(tracker.len(), HISTORY_CAPACITY);
        tracker.reset();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_drop_detected() {
        let mut tracker = DynamicsTracker::new();
        tracker.push(0.0, with(0.3, 0.4, 0.4));
        tracker.push(1.0, with(0.3, 0.4, 0.4));
        let out = tracker.push(2.0, with(0.8, 0.4, 0.4));

        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.changes[0].kind, EnergyChangeKind::Drop);
        assert!((out.changes[0].intensity - 1.0).abs() < 1e-6);
        assert!(out
            .filters
            .iter()
            .any(|f| f.filter.filter_type == FilterType::LowShelf && f.filter.frequency_hz == 100.0));
        assert_eq!(out.effects.apply_at, Some(2.1));
        assert_eq!(out.effects.effects.delay, 0.05);
    }

    #[test]
    fn test_build_up_detected() {
        let mut tracker = DynamicsTracker::new();
        tracker.push(0.0, with(0.5, 0.2, 0.2));
        tracker.push(1.0, with(0.5, 0.2, 0.2));
        let out = tracker.push(2.0, with(0.5, 0.4, 0.4));
        assert_eq!(out.changes[0].kind, EnergyChangeKind::BuildUp);
        assert!((out.changes[0].intensity - 0.4).abs() < 1e-5);
        let fx = out.effects.effects;
        assert!((fx.feedback - 0.38).abs() < 1e-5);
        assert_eq!(out.effects.duration, Some(2.0));
    }

    #[test]
    fn test_breakdown_uses_signed_swing() {
        let mut tracker = DynamicsTracker::new();
        tracker.push(0.0, with(0.6, 0.6, 0.6));
        tracker.push(1.0, with(0.6, 0.6, 0.6));
        let out = tracker.push(2.0, with(0.4, 0.4, 0.4));
        assert_eq!(out.changes[0].kind, EnergyChangeKind::Breakdown);
        assert!((out.changes[0].intensity - 0.6).abs() < 1e-5);
        assert_eq!(out.effects.effects.reverb, 0.4);
        assert_eq!(out.effects.apply_at, Some(2.3));
    }

    #[test]
    fn test_transition_catch_all() {
        let mut tracker = DynamicsTracker::new();
        tracker.push(0.0, with(0.5, 0.5, 0.5));
        tracker.push(1.0, with(0.5, 0.5, 0.5));
        // Bass up, highs down: big swing but not a drop or breakdown
        let out = tracker.push(2.0, with(0.65, 0.5, 0.3));
        assert_eq!(out.changes[0].kind, EnergyChangeKind::Transition);
        assert!(out
            .filters
            .iter()
            .any(|f| f.filter.frequency_hz == 2000.0 && f.filter.q == Some(2.0)));
    }

    #[test]
    fn test_trend_rules() {
        let mut tracker = DynamicsTracker::new();
        let mut out = DynamicsAnalysis::default();
        for i in 0..6 {
            let t = i as f32 * 0.08;
            out = tracker.push(i as f64, with(0.2 + t, 0.5, 0.45 - t * 0.9));
        }
        assert_eq!(out.trends.bass, Trend::Increasing);
        assert_eq!(out.trends.high, Trend::Decreasing);
        assert!(out
            .filters
            .iter()
            .any(|f| f.filter.frequency_hz == 150.0 && f.duration == 4.0));
        assert!(out
            .filters
            .iter()
            .any(|f| f.filter.frequency_hz == 8000.0 && f.duration == 3.0));
    }
}
