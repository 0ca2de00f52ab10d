//! Tracks, metadata patches and the display projection

use autodj_analysis::TrackHints;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transition::DEFAULT_BPM;

/// Title shown until metadata or the filename resolves
pub const LOADING_TITLE: &str = "Loading...";

/// Number of points in a display waveform
pub const WAVEFORM_POINTS: usize = 100;

/// Keywords searched in title and artists when no genre is known, first match wins
const GENRE_KEYWORDS: [&str; 20] = [
    "rock",
    "pop",
    "hip hop",
    "rap",
    "jazz",
    "blues",
    "country",
    "electronic",
    "dance",
    "edm",
    "techno",
    "house",
    "trance",
    "ambient",
    "folk",
    "metal",
    "classical",
    "reggae",
    "r&b",
    "soul",
];

/// Identifies a playlist entry; every queued copy of the entry shares it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

/// A playable track and what is known about it so far
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub locator: String,
    pub title: String,
    pub artists: String,
    pub composer: Option<String>,
    pub duration_secs: Option<f64>,
    pub bpm: Option<f32>,
    pub genre: Option<String>,
    pub cover: Option<String>,
}

impl Track {
    /// Stub for a locator whose metadata is still unknown
    pub fn new(id: TrackId, locator: impl Into<String>) -> Self {
        Self {
            id,
            locator: locator.into(),
            title: LOADING_TITLE.to_string(),
            artists: String::new(),
            composer: None,
            duration_secs: None,
            bpm: None,
            genre: None,
            cover: None,
        }
    }

    /// Patch the fields an update carries
    pub fn apply(&mut self, update: &TrackUpdate) {
        if let Some(title) = &update.title {
            self.title = title.clone();
        }
        if let Some(artists) = &update.artists {
            self.artists = artists.clone();
        }
        if let Some(composer) = &update.composer {
            self.composer = Some(composer.clone());
        }
        if let Some(duration) = update.duration_secs {
            self.duration_secs = Some(duration);
        }
        if let Some(bpm) = update.bpm {
            self.bpm = Some(bpm);
        }
        if let Some(genre) = &update.genre {
            self.genre = Some(genre.clone());
        }
        if let Some(cover) = &update.cover {
            self.cover = Some(cover.clone());
        }
    }

    /// Detected tempo, or the default when none is known
    pub fn bpm_or_default(&self) -> f32 {
        self.bpm.filter(|b| *b > 0.0).unwrap_or(DEFAULT_BPM)
    }

    /// Advisor hints: the known genre, or one guessed from title and artists
    pub fn hints(&self) -> TrackHints {
        TrackHints {
            genre: self
                .genre
                .clone()
                .or_else(|| guess_genre(&self.title, &self.artists)),
            artist: (!self.artists.is_empty()).then(|| self.artists.clone()),
            energy: None,
            valence: None,
        }
    }
}

/// Partial metadata for a track; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    pub title: Option<String>,
    pub artists: Option<String>,
    pub composer: Option<String>,
    pub duration_secs: Option<f64>,
    pub bpm: Option<f32>,
    pub genre: Option<String>,
    pub cover: Option<String>,
}

impl TrackUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Genre keyword found in the title or artists
pub fn guess_genre(title: &str, artists: &str) -> Option<String> {
    let haystack = format!("{title} {artists}").to_lowercase();
    GENRE_KEYWORDS
        .iter()
        .find(|k| haystack.contains(*k))
        .map(|k| k.to_string())
}

/// `m:ss` for a number of seconds
pub fn format_clock(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Read-only view of a track for display
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySong {
    pub title: String,
    pub artists: String,
    pub cover: String,
    /// `m:ss`
    pub current_time: String,
    /// `m:ss`, or `--:--` while unknown
    pub duration: String,
    /// 0 - 100
    pub progress: f32,
    /// `WAVEFORM_POINTS` values, 0 - 100
    pub waveform: Vec<u8>,
    pub is_playing: bool,
}

impl DisplaySong {
    pub fn from_track(track: &Track, position: f64, duration: Option<f64>, is_playing: bool) -> Self {
        let progress = match duration {
            Some(d) if d > 0.0 => (position / d * 100.0).clamp(0.0, 100.0) as f32,
            _ => 0.0,
        };
        Self {
            title: track.title.clone(),
            artists: track.artists.clone(),
            cover: track.cover.clone().unwrap_or_default(),
            current_time: format_clock(position),
            duration: duration.map(format_clock).unwrap_or_else(|| "--:--".to_string()),
            progress,
            waveform: waveform(track.id),
            is_playing,
        }
    }

    /// A track waiting in the queue
    pub fn queued(track: &Track) -> Self {
        Self::from_track(track, 0.0, track.duration_secs, false)
    }
}

/// Decorative waveform, stable per track
fn waveform(id: TrackId) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(id.0);
    (0..WAVEFORM_POINTS).map(|_| rng.gen_range(0..=100)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_and_update() {
        let mut track = Track::new(TrackId(1), "/music/a.mp3");
        assert_eq!(track.title, LOADING_TITLE);
        assert_eq!(track.bpm_or_default(), DEFAULT_BPM);

        let update = TrackUpdate {
            title: Some("Strobe".to_string()),
            bpm: Some(128.0),
            ..Default::default()
        };
        assert!(!update.is_empty());
        track.apply(&update);
        assert_eq!(track.title, "Strobe");
        assert_eq!(track.bpm, Some(128.0));
        assert_eq!(track.artists, "");
        assert!(TrackUpdate::default().is_empty());
    }

    #[test]
    fn test_guess_genre() {
        assert_eq!(guess_genre("Deep House Mix", "Someone"), Some("house".to_string()));
        assert_eq!(guess_genre("Untitled", "Jazz Trio"), Some("jazz".to_string()));
        assert_eq!(guess_genre("Untitled", "Nobody"), None);

        let mut track = Track::new(TrackId(2), "b.mp3");
        track.title = "Techno Bunker".to_string();
        assert_eq!(track.hints().genre.as_deref(), Some("techno"));
        track.genre = Some("ambient".to_string());
        assert_eq!(track.hints().genre.as_deref(), Some("ambient"));
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(65.9), "1:05");
        assert_eq!(format_clock(600.0), "10:00");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }

    #[test]
    fn test_display_song() {
        let mut track = Track::new(TrackId(3), "c.mp3");
        track.duration_secs = Some(200.0);

        let song = DisplaySong::from_track(&track, 50.0, Some(200.0), true);
        assert_eq!(song.current_time, "0:50");
        assert_eq!(song.duration, "3:20");
        assert!((song.progress - 25.0).abs() < 1e-4);
        assert_eq!(song.waveform.len(), WAVEFORM_POINTS);
        assert!(song.waveform.iter().all(|v| *v <= 100));
        assert_eq!(song.waveform, DisplaySong::queued(&track).waveform);

        let unknown = DisplaySong::from_track(&track, 10.0, None, false);
        assert_eq!(unknown.duration, "--:--");
        assert_eq!(unknown.progress, 0.0);
    }
}
