//! Rating history with similarity lookup

use std::collections::VecDeque;

use super::{AudioCharacteristics, EffectSpec, FilterSpec, Thresholds, TrackHints};
use crate::features::EnergyLevels;

/// Maximum number of rated entries kept (oldest evicted first)
pub const LEARNING_CAPACITY: usize = 100;

/// Frequencies within this ratio are treated as the same filter when blending
const FREQUENCY_MATCH_RATIO: f32 = 0.2;

/// Manual corrections a user made on top of the suggestions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAdjustments {
    pub filters: Option<Vec<FilterSpec>>,
    pub effects: Option<EffectSpec>,
}

/// A rating for the sound the advisor produced
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub energy: EnergyLevels,
    pub characteristics: AudioCharacteristics,
    pub filters: Vec<FilterSpec>,
    pub effects: EffectSpec,
    /// 1 (bad) to 5 (great)
    pub rating: u8,
    pub adjustments: Option<UserAdjustments>,
    pub hints: TrackHints,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

/// One remembered rating
#[derive(Debug, Clone, PartialEq)]
pub struct LearningEntry {
    pub energy: EnergyLevels,
    pub characteristics: AudioCharacteristics,
    pub filters: Vec<FilterSpec>,
    pub effects: EffectSpec,
    pub rating: u8,
    pub adjustments: Option<UserAdjustments>,
    pub hints: TrackHints,
    pub timestamp: u64,
}

impl LearningEntry {
    pub(super) fn from_feedback(feedback: Feedback) -> Self {
        Self {
            energy: feedback.energy,
            characteristics: feedback.characteristics,
            filters: feedback.filters,
            effects: feedback.effects,
            rating: feedback.rating.clamp(1, 5),
            adjustments: feedback.adjustments,
            hints: feedback.hints,
            timestamp: feedback.timestamp,
        }
    }

    /// Similarity score: mean per-band closeness, plus bonuses for a shared
    /// genre (+0.2) or artist (+0.1)
    pub fn similarity(&self, energy: &EnergyLevels, hints: Option<&TrackHints>) -> f32 {
        let a = self.energy.as_array();
        let b = energy.as_array();
        let mut score =
            a.iter().zip(b.iter()).map(|(x, y)| 1.0 - (x - y).abs()).sum::<f32>() / a.len() as f32;

        if let Some(hints) = hints {
            if same(&self.hints.genre, &hints.genre) {
                score += 0.2;
            }
            if same(&self.hints.artist, &hints.artist) {
                score += 0.1;
            }
        }
        score
    }
}

fn same(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x.eq_ignore_ascii_case(y))
}

/// FIFO ring buffer of rated entries
#[derive(Debug, Clone, Default)]
pub struct LearningHistory {
    entries: VecDeque<LearningEntry>,
}

impl LearningHistory {
    /// Ratings at or above this count as "good" for threshold adaptation
    const GOOD_RATING: u8 = 3;

    /// Good entries required before thresholds move
    const MIN_GOOD_ENTRIES: usize = 5;

    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(LEARNING_CAPACITY),
        }
    }

    pub fn push(&mut self, entry: LearningEntry) {
        if self.entries.len() == LEARNING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LearningEntry> {
        self.entries.iter()
    }

    /// Best matching entry and its score
    pub fn most_similar(
        &self,
        energy: &EnergyLevels,
        hints: Option<&TrackHints>,
    ) -> Option<(f32, &LearningEntry)> {
        self.entries
            .iter()
            .map(|e| (e.similarity(energy, hints), e))
            .fold(None, |best: Option<(f32, &LearningEntry)>, cur| match best {
                Some(b) if b.0 >= cur.0 => Some(b),
                _ => Some(cur),
            })
    }

    /// Thresholds pulled toward the average energy of well-rated entries
    pub fn adjusted_thresholds(&self, current: Thresholds) -> Option<Thresholds> {
        let good: Vec<&LearningEntry> = self
            .entries
            .iter()
            .filter(|e| e.rating >= Self::GOOD_RATING)
            .collect();
        if good.len() < Self::MIN_GOOD_ENTRIES {
            return None;
        }

        let avg = good.iter().map(|e| e.energy.average()).sum::<f32>() / good.len() as f32;
        let medium = 0.7 * current.medium + 0.3 * avg;
        Some(Thresholds {
            low: medium * 0.5,
            medium,
            high: (medium * 1.5).min(0.9),
        })
    }
}

/// Merge suggested filters with a learned entry.
///
/// User-adjusted filters win outright. Otherwise filters of the same type
/// whose frequencies are within 20% are averaged; the rest are appended.
pub(super) fn blend_filters(suggested: Vec<FilterSpec>, entry: &LearningEntry) -> Vec<FilterSpec> {
    if let Some(adjusted) = entry.adjustments.as_ref().and_then(|a| a.filters.as_ref()) {
        return adjusted.clone();
    }

    let mut blended = suggested;
    for learned in &entry.filters {
        let matching = blended.iter_mut().find(|f| {
            f.filter_type == learned.filter_type
                && (f.frequency_hz - learned.frequency_hz).abs()
                    <= f.frequency_hz.abs() * FREQUENCY_MATCH_RATIO
        });
        match matching {
            Some(f) => {
                f.gain_db = (f.gain_db + learned.gain_db) / 2.0;
                f.q = match (f.q, learned.q) {
                    (Some(a), Some(b)) => Some((a + b) / 2.0),
                    (a, b) => a.or(b),
                };
            }
            None => blended.push(*learned),
        }
    }
    blended
}

/// Average suggested effects with what the entry used (or what the user set)
pub(super) fn blend_effects(suggested: EffectSpec, entry: &LearningEntry) -> EffectSpec {
    let learned = entry
        .adjustments
        .as_ref()
        .and_then(|a| a.effects)
        .unwrap_or(entry.effects);
    EffectSpec {
        reverb: (suggested.reverb + learned.reverb) / 2.0,
        delay: (suggested.delay + learned.delay) / 2.0,
        delay_time_secs: (suggested.delay_time_secs + learned.delay_time_secs) / 2.0,
        feedback: (suggested.feedback + learned.feedback) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::FilterType;

    fn entry(energy: EnergyLevels, rating: u8) -> LearningEntry {
        LearningEntry {
            energy,
            characteristics: AudioCharacteristics::default(),
            filters: Vec::new(),
            effects: EffectSpec::default(),
            rating,
            adjustments: None,
            hints: TrackHints::default(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = LearningHistory::new();
        for i in 0..(LEARNING_CAPACITY + 5) {
            let mut e = entry(EnergyLevels::default(), 3);
            e.timestamp = i as u64;
            history.push(e);
        }
        assert_eq!(history.len(), LEARNING_CAPACITY);
        assert_eq!(history.entries().next().map(|e| e.timestamp), Some(5));
    }

    #[test]
    fn test_similarity_bonuses() {
        let mut e = entry(EnergyLevels::uniform(0.5), 5);
        e.hints = TrackHints {
            genre: Some("House".into()),
            artist: Some("Someone".into()),
            ..Default::default()
        };
        let hints = TrackHints {
            genre: Some("house".into()),
            artist: Some("Other".into()),
            ..Default::default()
        };
        let score = e.similarity(&EnergyLevels::uniform(0.4), Some(&hints));
        assert!((score - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_most_similar_picks_closest() {
        let mut history = LearningHistory::new();
        history.push(entry(EnergyLevels::uniform(0.1), 5));
        history.push(entry(EnergyLevels::uniform(0.6), 5));
        let (score, best) = history.most_similar(&EnergyLevels::uniform(0.55), None).unwrap();
        assert_eq!(best.energy, EnergyLevels::uniform(0.6));
        assert!((score - 0.95).abs() < 1e-5);
        assert!(LearningHistory::new().most_similar(&EnergyLevels::default(), None).is_none());
    }

    #[test]
    fn test_adjusted_thresholds_need_good_entries() {
        let mut history = LearningHistory::new();
        for _ in 0..4 {
            history.push(entry(EnergyLevels::uniform(0.4), 5));
        }
        for _ in 0..6 {
            history.push(entry(EnergyLevels::uniform(0.9), 1));
        }
        assert!(history.adjusted_thresholds(Thresholds::default()).is_none());
    }

    #[test]
    fn test_high_threshold_capped() {
        let mut history = LearningHistory::new();
        for _ in 0..5 {
            history.push(entry(EnergyLevels::uniform(1.0), 5));
        }
        let t = history
            .adjusted_thresholds(Thresholds {
                low: 0.4,
                medium: 0.8,
                high: 0.9,
            })
            .unwrap();
        assert!((t.medium - 0.86).abs() < 1e-5);
        assert_eq!(t.high, 0.9);
    }

    #[test]
    fn test_blend_filters_merges_and_appends() {
        let mut e = entry(EnergyLevels::default(), 5);
        e.filters = vec![
            FilterSpec::new(FilterType::LowShelf, 160.0, 1.0),
            FilterSpec::new(FilterType::Peaking, 2500.0, -1.0).with_q(2.0),
        ];
        let suggested = vec![FilterSpec::new(FilterType::LowShelf, 150.0, 3.0)];
        let blended = blend_filters(suggested, &e);

        assert_eq!(blended.len(), 2);
        assert_eq!(blended[0].gain_db, 2.0);
        assert_eq!(blended[0].frequency_hz, 150.0);
        assert_eq!(blended[1].frequency_hz, 2500.0);
    }

    #[test]
    fn test_user_adjustments_replace() {
        let mut e = entry(EnergyLevels::default(), 5);
        let manual = vec![FilterSpec::new(FilterType::HighShelf, 9000.0, -4.0)];
        e.adjustments = Some(UserAdjustments {
            filters: Some(manual.clone()),
            effects: None,
        });
        let blended = blend_filters(vec![FilterSpec::new(FilterType::LowShelf, 150.0, 3.0)], &e);
        assert_eq!(blended, manual);
    }

    #[test]
    fn test_rating_clamped() {
        let fb = Feedback {
            energy: EnergyLevels::default(),
            characteristics: AudioCharacteristics::default(),
            filters: Vec::new(),
            effects: EffectSpec::default(),
            rating: 9,
            adjustments: None,
            hints: TrackHints::default(),
            timestamp: 0,
        };
        assert_eq!(LearningEntry::from_feedback(fb).rating, 5);
    }
}
