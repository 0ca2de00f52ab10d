//! Heuristic filter and effect advisor
//!
//! Maps banded energy to suggested EQ filters and effect sends, tracks
//! short-term dynamics of the playing track, and learns from ratings.
//! The playback engine consults it but never depends on it: every method is
//! cheap, synchronous and infallible.

mod dynamics;
mod learning;
mod transitions;

pub use dynamics::{
    DynamicsAnalysis, DynamicsTracker, EnergyChange, EnergyChangeKind, TimedEffectSpec,
    TimedFilterSpec, Trend, TrendSet, HISTORY_CAPACITY,
};
pub use learning::{Feedback, LearningEntry, LearningHistory, UserAdjustments, LEARNING_CAPACITY};
pub use transitions::{Reaction, TransitionMemory, TransitionPrediction, TransitionRecord};

use crate::features::EnergyLevels;
use crate::spectrum::FrequencySnapshot;

/// Biquad response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
    LowShelf,
    HighShelf,
    Peaking,
}

impl FilterType {
    /// Stable lowercase name (used for persistence)
    pub fn as_str(self) -> &'static str {
        match self {
            FilterType::LowPass => "lowpass",
            FilterType::HighPass => "highpass",
            FilterType::BandPass => "bandpass",
            FilterType::LowShelf => "lowshelf",
            FilterType::HighShelf => "highshelf",
            FilterType::Peaking => "peaking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lowpass" => Some(FilterType::LowPass),
            "highpass" => Some(FilterType::HighPass),
            "bandpass" => Some(FilterType::BandPass),
            "lowshelf" => Some(FilterType::LowShelf),
            "highshelf" => Some(FilterType::HighShelf),
            "peaking" => Some(FilterType::Peaking),
            _ => None,
        }
    }
}

/// A suggested EQ filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub filter_type: FilterType,
    pub frequency_hz: f32,
    pub gain_db: f32,
    pub q: Option<f32>,
}

impl FilterSpec {
    pub fn new(filter_type: FilterType, frequency_hz: f32, gain_db: f32) -> Self {
        Self {
            filter_type,
            frequency_hz,
            gain_db,
            q: None,
        }
    }

    pub fn with_q(mut self, q: f32) -> Self {
        self.q = Some(q);
        self
    }
}

/// Suggested effect send levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectSpec {
    /// Reverb wet level (0.0 - 1.0)
    pub reverb: f32,
    /// Delay wet level (0.0 - 1.0)
    pub delay: f32,
    /// Delay time in seconds
    pub delay_time_secs: f32,
    /// Delay feedback (0.0 - 1.0)
    pub feedback: f32,
}

impl Default for EffectSpec {
    fn default() -> Self {
        Self {
            reverb: 0.2,
            delay: 0.1,
            delay_time_secs: 0.25,
            feedback: 0.2,
        }
    }
}

impl EffectSpec {
    /// Longest delay time suggested for non-rhythmic use
    pub const MAX_DELAY_TIME_SECS: f32 = 0.4;

    /// Clamp every field to its valid range
    pub fn clamped(self) -> Self {
        Self {
            reverb: self.reverb.clamp(0.0, 1.0),
            delay: self.delay.clamp(0.0, 1.0),
            delay_time_secs: self.delay_time_secs.clamp(0.0, Self::MAX_DELAY_TIME_SECS),
            feedback: self.feedback.clamp(0.0, 1.0),
        }
    }
}

/// Energy thresholds used to classify a track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f32,
    pub medium: f32,
    pub high: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.8,
        }
    }
}

/// Coarse tonal character of a track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioCharacteristics {
    pub is_bassy: bool,
    pub is_mid_heavy: bool,
    pub is_high_heavy: bool,
    pub is_balanced: bool,
    pub is_dynamic: bool,
    pub needs_clarity: bool,
    pub needs_warmth: bool,
}

/// Optional per-track hints (metadata, mood)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackHints {
    pub genre: Option<String>,
    pub artist: Option<String>,
    /// Perceived energy 0.0 - 1.0 (defaults to 0.5 when unknown)
    pub energy: Option<f32>,
    /// Perceived positivity 0.0 - 1.0 (defaults to 0.5 when unknown)
    pub valence: Option<f32>,
}

/// Everything the advisor has learned, in a persistable form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningSnapshot {
    pub entries: Vec<LearningEntry>,
    pub thresholds: Option<Thresholds>,
    pub transitions: Vec<(String, TransitionRecord)>,
}

/// Heuristic advisor
pub struct HeuristicAdvisor {
    thresholds: Thresholds,
    thresholds_adjusted: bool,
    history: LearningHistory,
    transitions: TransitionMemory,
    dynamics: DynamicsTracker,
}

impl Default for HeuristicAdvisor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicAdvisor {
    /// Minimum similarity for a learned entry to influence suggestions
    const SIMILARITY_THRESHOLD: f32 = 0.8;

    /// Minimum rating (1-5) for a learned entry to influence suggestions
    const MIN_BLEND_RATING: u8 = 4;

    /// Entries needed before thresholds adapt
    const ADJUST_AFTER_ENTRIES: usize = 10;

    pub fn new() -> Self {
        Self {
            thresholds: Thresholds::default(),
            thresholds_adjusted: false,
            history: LearningHistory::new(),
            transitions: TransitionMemory::default(),
            dynamics: DynamicsTracker::new(),
        }
    }

    /// Create an advisor pre-loaded with previously persisted learning
    pub fn with_learning(snapshot: LearningSnapshot) -> Self {
        let mut advisor = Self::new();
        advisor.restore(snapshot);
        advisor
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Classify energy levels against the current thresholds
    pub fn characteristics(&self, energy: &EnergyLevels) -> AudioCharacteristics {
        let t = self.thresholds;
        let variance = energy.variance();
        AudioCharacteristics {
            is_bassy: energy.sub_bass > t.high || energy.bass > t.high,
            is_mid_heavy: energy.low_mid > t.high || energy.mid > t.high,
            is_high_heavy: energy.high_mid > t.high || energy.high > t.high,
            is_balanced: variance < 0.05,
            is_dynamic: variance > 0.1,
            needs_clarity: energy.mid > t.high && energy.high < t.medium,
            needs_warmth: energy.high > t.high && energy.mid < t.medium,
        }
    }

    /// Suggest corrective EQ filters.
    ///
    /// Deterministic given its inputs, except for blending with a highly
    /// rated, sufficiently similar entry from the learning history.
    pub fn suggest_filters(
        &self,
        ch: &AudioCharacteristics,
        energy: &EnergyLevels,
        hints: Option<&TrackHints>,
    ) -> Vec<FilterSpec> {
        let mut filters = Vec::new();

        if ch.is_bassy && energy.bass > 0.9 {
            filters.push(FilterSpec::new(FilterType::LowShelf, 200.0, -3.0));
        } else if !ch.is_bassy && energy.bass < 0.4 {
            filters.push(FilterSpec::new(FilterType::LowShelf, 150.0, 3.0));
        }

        if ch.is_mid_heavy && ch.needs_clarity {
            filters.push(FilterSpec::new(FilterType::Peaking, 1000.0, -2.0).with_q(1.0));
        } else if !ch.is_mid_heavy && ch.needs_warmth {
            filters.push(FilterSpec::new(FilterType::Peaking, 800.0, 2.0).with_q(1.0));
        }

        if !ch.is_high_heavy && energy.high < 0.4 {
            filters.push(FilterSpec::new(FilterType::HighShelf, 8000.0, 3.0));
        } else if ch.is_high_heavy && energy.high > 0.9 {
            filters.push(FilterSpec::new(FilterType::HighShelf, 10000.0, -2.0));
        }

        match self.matching_entry(energy, hints) {
            Some(entry) => {
                tracing::debug!(rating = entry.rating, "blending filters with learned entry");
                learning::blend_filters(filters, entry)
            }
            None => filters,
        }
    }

    /// Suggest reverb/delay sends
    pub fn suggest_effects(
        &self,
        ch: &AudioCharacteristics,
        energy: &EnergyLevels,
        hints: Option<&TrackHints>,
    ) -> EffectSpec {
        let mut effects = EffectSpec::default();

        if ch.is_high_heavy {
            effects.reverb = 0.15;
        } else if ch.is_bassy {
            effects.reverb = 0.1;
        } else if ch.is_balanced {
            effects.reverb = 0.3;
        }

        if ch.is_dynamic {
            effects.delay = 0.2;
            effects.feedback = 0.3;
        } else if ch.is_bassy {
            effects.delay = 0.05;
            effects.feedback = 0.1;
        }

        if energy.high > energy.bass {
            effects.delay_time_secs = 0.125;
        } else if energy.bass > energy.high {
            effects.delay_time_secs = 0.375;
        }

        let effects = match self.matching_entry(energy, hints) {
            Some(entry) => learning::blend_effects(effects, entry),
            None => effects,
        };
        effects.clamped()
    }

    /// Feed a live snapshot and get timed filters/effects for the events found
    pub fn analyze_dynamics(
        &mut self,
        snapshot: &FrequencySnapshot,
        current_time: f64,
        song_duration: f64,
        _hints: Option<&TrackHints>,
    ) -> DynamicsAnalysis {
        self.dynamics.analyze(snapshot, current_time, song_duration)
    }

    /// Forget the rolling dynamics history (call on track change)
    pub fn reset_history(&mut self) {
        self.dynamics.reset();
    }

    /// Number of snapshots currently in the dynamics history
    pub fn dynamics_len(&self) -> usize {
        self.dynamics.len()
    }

    /// Record a user rating for the current sound
    pub fn provide_feedback(&mut self, feedback: Feedback) {
        let entry = LearningEntry::from_feedback(feedback);
        self.history.push(entry);

        if self.history.len() >= Self::ADJUST_AFTER_ENTRIES && !self.thresholds_adjusted {
            if let Some(adjusted) = self.history.adjusted_thresholds(self.thresholds) {
                tracing::info!(
                    low = adjusted.low,
                    medium = adjusted.medium,
                    high = adjusted.high,
                    "advisor thresholds adapted"
                );
                self.thresholds = adjusted;
                self.thresholds_adjusted = true;
            }
        }
    }

    /// Learn from how well a transition between two tracks went
    pub fn record_transition(
        &mut self,
        from: (&TrackHints, f32),
        to: (&TrackHints, f32),
        quality: f32,
        reaction: Option<Reaction>,
    ) {
        self.transitions.record(from, to, quality, reaction);
    }

    /// Predict how well a transition between two tracks will go
    pub fn predict_transition(
        &self,
        from: (&TrackHints, f32),
        to: (&TrackHints, f32),
    ) -> TransitionPrediction {
        self.transitions.predict(from, to)
    }

    pub fn learning_len(&self) -> usize {
        self.history.len()
    }

    /// Export learned state for persistence
    pub fn learning_snapshot(&self) -> LearningSnapshot {
        LearningSnapshot {
            entries: self.history.entries().cloned().collect(),
            thresholds: self.thresholds_adjusted.then_some(self.thresholds),
            transitions: self.transitions.records(),
        }
    }

    /// Replace learned state with a persisted snapshot
    pub fn restore(&mut self, snapshot: LearningSnapshot) {
        self.history = LearningHistory::new();
        for entry in snapshot.entries {
            self.history.push(entry);
        }
        match snapshot.thresholds {
            Some(t) => {
                self.thresholds = t;
                self.thresholds_adjusted = true;
            }
            None => {
                self.thresholds = Thresholds::default();
                self.thresholds_adjusted = false;
            }
        }
        self.transitions = TransitionMemory::from_records(snapshot.transitions);
    }

    fn matching_entry(
        &self,
        energy: &EnergyLevels,
        hints: Option<&TrackHints>,
    ) -> Option<&LearningEntry> {
        self.history
            .most_similar(energy, hints)
            .filter(|(score, entry)| {
                *score > Self::SIMILARITY_THRESHOLD && entry.rating >= Self::MIN_BLEND_RATING
            })
            .map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(sub: f32, bass: f32, low_mid: f32, mid: f32, high_mid: f32, high: f32) -> EnergyLevels {
        EnergyLevels {
            sub_bass: sub,
            bass,
            low_mid,
            mid,
            high_mid,
            high,
            very_high: high,
        }
    }

    #[test]
    fn test_characteristics_bassy() {
        let advisor = HeuristicAdvisor::new();
        let ch = advisor.characteristics(&levels(0.95, 0.95, 0.1, 0.1, 0.1, 0.1));
        assert!(ch.is_bassy);
        assert!(!ch.is_high_heavy);
        assert!(ch.is_dynamic);
    }

    #[test]
    fn test_characteristics_clarity_and_warmth() {
        let advisor = HeuristicAdvisor::new();
        let muddy = advisor.characteristics(&levels(0.5, 0.5, 0.5, 0.85, 0.4, 0.4));
        assert!(muddy.needs_clarity);
        assert!(!muddy.needs_warmth);

        let harsh = advisor.characteristics(&levels(0.5, 0.5, 0.5, 0.4, 0.5, 0.85));
        assert!(harsh.needs_warmth);
        assert!(!harsh.needs_clarity);
    }

    #[test]
    fn test_suggest_filters_thin_track() {
        let advisor = HeuristicAdvisor::new();
        let energy = levels(0.2, 0.3, 0.3, 0.3, 0.3, 0.3);
        let ch = advisor.characteristics(&energy);
        let filters = advisor.suggest_filters(&ch, &energy, None);

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0], FilterSpec::new(FilterType::LowShelf, 150.0, 3.0));
        assert_eq!(filters[1], FilterSpec::new(FilterType::HighShelf, 8000.0, 3.0));
    }

    #[test]
    fn test_suggest_filters_heavy_track() {
        let advisor = HeuristicAdvisor::new();
        let energy = levels(0.95, 0.95, 0.9, 0.9, 0.95, 0.95);
        let ch = advisor.characteristics(&energy);
        let filters = advisor.suggest_filters(&ch, &energy, None);

        assert!(filters.contains(&FilterSpec::new(FilterType::LowShelf, 200.0, -3.0)));
        assert!(filters.contains(&FilterSpec::new(FilterType::HighShelf, 10000.0, -2.0)));
    }

    #[test]
    fn test_suggest_effects_rules() {
        let advisor = HeuristicAdvisor::new();

        let bright = levels(0.3, 0.3, 0.4, 0.4, 0.9, 0.9);
        let fx = advisor.suggest_effects(&advisor.characteristics(&bright), &bright, None);
        assert_eq!(fx.reverb, 0.15);
        assert_eq!(fx.delay_time_secs, 0.125);

        let flat = EnergyLevels::uniform(0.5);
        let fx = advisor.suggest_effects(&advisor.characteristics(&flat), &flat, None);
        assert_eq!(fx.reverb, 0.3);
        assert_eq!(fx.delay, 0.1);
        assert_eq!(fx.delay_time_secs, 0.25);
        assert!(fx.delay_time_secs <= EffectSpec::MAX_DELAY_TIME_SECS);
    }

    #[test]
    fn test_learned_entry_blends_effects() {
        let mut advisor = HeuristicAdvisor::new();
        let energy = EnergyLevels::uniform(0.5);
        let ch = advisor.characteristics(&energy);

        advisor.provide_feedback(Feedback {
            energy,
            characteristics: ch,
            filters: Vec::new(),
            effects: EffectSpec {
                reverb: 0.5,
                delay: 0.3,
                delay_time_secs: 0.25,
                feedback: 0.2,
            },
            rating: 5,
            adjustments: None,
            hints: TrackHints::default(),
            timestamp: 1,
        });

        let fx = advisor.suggest_effects(&ch, &energy, None);
        // (0.3 + 0.5) / 2 and (0.1 + 0.3) / 2
        assert!((fx.reverb - 0.4).abs() < 1e-6);
        assert!((fx.delay - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_low_rating_not_blended() {
        let mut advisor = HeuristicAdvisor::new();
        let energy = EnergyLevels::uniform(0.5);
        let ch = advisor.characteristics(&energy);

        advisor.provide_feedback(Feedback {
            energy,
            characteristics: ch,
            filters: vec![FilterSpec::new(FilterType::Peaking, 3000.0, 4.0)],
            effects: EffectSpec::default(),
            rating: 2,
            adjustments: None,
            hints: TrackHints::default(),
            timestamp: 1,
        });

        let filters = advisor.suggest_filters(&ch, &energy, None);
        assert!(filters.iter().all(|f| f.frequency_hz != 3000.0));
    }

    #[test]
    fn test_thresholds_adapt_after_ten_entries() {
        let mut advisor = HeuristicAdvisor::new();
        let energy = EnergyLevels::uniform(0.2);
        let ch = advisor.characteristics(&energy);

        for i in 0..10 {
            advisor.provide_feedback(Feedback {
                energy,
                characteristics: ch,
                filters: Vec::new(),
                effects: EffectSpec::default(),
                rating: 4,
                adjustments: None,
                hints: TrackHints::default(),
                timestamp: i,
            });
        }

        let t = advisor.thresholds();
        // 0.7 * 0.6 + 0.3 * 0.2
        assert!((t.medium - 0.48).abs() < 1e-5);
        assert!((t.low - 0.24).abs() < 1e-5);
        assert!((t.high - 0.72).abs() < 1e-5);
        assert!(advisor.learning_snapshot().thresholds.is_some());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut advisor = HeuristicAdvisor::new();
        let hints = TrackHints {
            genre: Some("house".into()),
            ..Default::default()
        };
        advisor.record_transition((&hints, 124.0), (&hints, 126.0), 9.0, None);

        let snapshot = advisor.learning_snapshot();
        let restored = HeuristicAdvisor::with_learning(snapshot.clone());
        assert_eq!(restored.learning_snapshot(), snapshot);
        assert_eq!(restored.thresholds(), Thresholds::default());
    }

    #[test]
    fn test_filter_type_names() {
        for t in [
            FilterType::LowPass,
            FilterType::HighPass,
            FilterType::BandPass,
            FilterType::LowShelf,
            FilterType::HighShelf,
            FilterType::Peaking,
        ] {
            assert_eq!(FilterType::parse(t.as_str()), Some(t));
        }
        assert_eq!(FilterType::parse("notch"), None);
    }
}
