//! Learned transition outcomes keyed by genre pair and tempo bucket

use std::collections::HashMap;

use super::TrackHints;

/// Score assumed for transitions never seen before (0-10 scale)
const DEFAULT_SUCCESS: f32 = 5.0;

/// How the listener reacted to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Skip,
    Like,
    Love,
}

impl Reaction {
    fn weight(self) -> f32 {
        match self {
            Reaction::Love => 2.0,
            Reaction::Like => 1.5,
            Reaction::Skip => 0.5,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Some(Reaction::Skip),
            "like" => Some(Reaction::Like),
            "love" => Some(Reaction::Love),
            _ => None,
        }
    }
}

/// Stored outcome for one transition key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRecord {
    /// Running success score (0-10 scale, may exceed 10 after a "love")
    pub success: f32,
    pub count: u32,
}

/// Prediction for a prospective transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionPrediction {
    /// 0.0 - ~1.0
    pub confidence: f32,
    /// Suggested crossfade length in seconds
    pub duration_secs: f32,
}

/// Transition outcome memory
#[derive(Debug, Clone, Default)]
pub struct TransitionMemory {
    records: HashMap<String, TransitionRecord>,
}

impl TransitionMemory {
    pub fn from_records(records: Vec<(String, TransitionRecord)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// All records sorted by key
    pub fn records(&self) -> Vec<(String, TransitionRecord)> {
        let mut out: Vec<_> = self.records.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn get(&self, key: &str) -> Option<&TransitionRecord> {
        self.records.get(key)
    }

    /// Key format: `{genreA}-{genreB}-{bucketA}-{bucketB}`, buckets are
    /// tempos rounded to the nearest 10 BPM
    pub fn key(from: (&TrackHints, f32), to: (&TrackHints, f32)) -> String {
        format!(
            "{}-{}-{}-{}",
            genre_of(from.0),
            genre_of(to.0),
            bucket(from.1),
            bucket(to.1)
        )
    }

    pub fn record(
        &mut self,
        from: (&TrackHints, f32),
        to: (&TrackHints, f32),
        quality: f32,
        reaction: Option<Reaction>,
    ) {
        let key = Self::key(from, to);
        let entry = self.records.entry(key.clone()).or_insert(TransitionRecord {
            success: DEFAULT_SUCCESS,
            count: 0,
        });

        let mut success = (entry.success + quality.clamp(0.0, 10.0)) / 2.0;
        if let Some(r) = reaction {
            success *= r.weight();
        }
        entry.success = success;
        entry.count += 1;

        tracing::debug!(%key, success, "transition outcome recorded");
    }

    pub fn predict(&self, from: (&TrackHints, f32), to: (&TrackHints, f32)) -> TransitionPrediction {
        let history = self
            .records
            .get(&Self::key(from, to))
            .map(|r| r.success)
            .unwrap_or(DEFAULT_SUCCESS);
        let bpm = bpm_compatibility(from.1, to.1);
        let genre = genre_compatibility(&genre_of(from.0), &genre_of(to.0));
        let emotional = emotional_compatibility(from.0, to.0);

        TransitionPrediction {
            confidence: (history * 0.4 + bpm * 0.3 + genre * 0.2 + emotional * 0.1) / 10.0,
            duration_secs: optimal_duration(from, to),
        }
    }
}

fn genre_of(hints: &TrackHints) -> String {
    hints
        .genre
        .as_deref()
        .map(|g| g.trim().to_ascii_lowercase())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn bucket(bpm: f32) -> i64 {
    ((bpm / 10.0).round() * 10.0) as i64
}

fn bpm_compatibility(a: f32, b: f32) -> f32 {
    let diff = (a - b).abs();
    if diff <= 5.0 {
        10.0
    } else if diff <= 10.0 {
        8.0
    } else if diff <= 20.0 {
        6.0
    } else if diff <= 30.0 {
        4.0
    } else {
        2.0
    }
}

fn genre_compatibility(a: &str, b: &str) -> f32 {
    if a == b {
        return 10.0;
    }
    match (a, b) {
        ("house", "techno") => 8.0,
        ("house", "deep house") => 9.0,
        ("house", "progressive") => 7.0,
        ("house", "trance") => 6.0,
        ("techno", "house") => 8.0,
        ("techno", "minimal") => 9.0,
        ("techno", "progressive") => 7.0,
        ("techno", "industrial") => 6.0,
        ("trance", "progressive") => 9.0,
        ("trance", "uplifting") => 8.0,
        ("trance", "house") => 6.0,
        ("trance", "ambient") => 5.0,
        ("hip-hop", "r&b") => 8.0,
        ("hip-hop", "trap") => 9.0,
        ("hip-hop", "funk") => 7.0,
        ("hip-hop", "soul") => 6.0,
        ("rock", "alternative") => 8.0,
        ("rock", "indie") => 7.0,
        ("rock", "metal") => 6.0,
        ("rock", "punk") => 7.0,
        _ => 3.0,
    }
}

fn emotional_compatibility(a: &TrackHints, b: &TrackHints) -> f32 {
    let energy = (a.energy.unwrap_or(0.5) - b.energy.unwrap_or(0.5)).abs();
    let valence = (a.valence.unwrap_or(0.5) - b.valence.unwrap_or(0.5)).abs();
    (10.0 - (energy + valence) * 10.0).max(0.0)
}

fn optimal_duration(from: (&TrackHints, f32), to: (&TrackHints, f32)) -> f32 {
    let diff = (from.1 - to.1).abs();
    let same_genre = genre_of(from.0) == genre_of(to.0);
    if same_genre && diff <= 5.0 {
        4.0
    } else if diff <= 10.0 {
        6.0
    } else if diff <= 20.0 {
        8.0
    } else {
        12.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genre(g: &str) -> TrackHints {
        TrackHints {
            genre: Some(g.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_buckets() {
        let key = TransitionMemory::key((&genre("House"), 124.0), (&genre("techno"), 136.0));
        assert_eq!(key, "house-techno-120-140");
        let unknown = TransitionMemory::key((&TrackHints::default(), 128.0), (&genre(""), 95.0));
        assert_eq!(unknown, "unknown-unknown-130-100");
    }

    #[test]
    fn test_record_with_reaction() {
        let mut memory = TransitionMemory::default();
        let h = genre("house");
        memory.record((&h, 128.0), (&h, 128.0), 9.0, Some(Reaction::Love));
        let rec = memory.get("house-house-130-130").unwrap();
        // (5 + 9) / 2 * 2
        assert_eq!(rec.success, 14.0);
        assert_eq!(rec.count, 1);

        memory.record((&h, 128.0), (&h, 128.0), 2.0, Some(Reaction::Skip));
        let rec = memory.get("house-house-130-130").unwrap();
        assert_eq!(rec.success, 4.0);
        assert_eq!(rec.count, 2);
    }

    #[test]
    fn test_predict_defaults() {
        let memory = TransitionMemory::default();
        let h = genre("house");
        let p = memory.predict((&h, 128.0), (&h, 130.0));
        // (5*0.4 + 10*0.3 + 10*0.2 + 10*0.1) / 10
        assert!((p.confidence - 0.8).abs() < 1e-6);
        assert_eq!(p.duration_secs, 4.0);
    }

    #[test]
    fn test_predict_cross_genre() {
        let memory = TransitionMemory::default();
        let p = memory.predict((&genre("rock"), 100.0), (&genre("techno"), 140.0));
        // (5*0.4 + 2*0.3 + 3*0.2 + 10*0.1) / 10
        assert!((p.confidence - 0.42).abs() < 1e-6);
        assert_eq!(p.duration_secs, 12.0);
        assert_eq!(genre_compatibility("house", "deep house"), 9.0);
    }

    #[test]
    fn test_reaction_parse() {
        assert_eq!(Reaction::parse("LOVE"), Some(Reaction::Love));
        assert_eq!(Reaction::parse("meh"), None);
    }
}
