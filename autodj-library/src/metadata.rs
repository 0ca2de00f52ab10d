//! Track metadata from tags, with a filename fallback

use std::path::Path;

use autodj_audio::TrackUpdate;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::meta::{StandardTagKey, Tag};
use thiserror::Error;

use crate::loader::{probe, LoadError};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Parenthesized text containing any of these is a mix name, not an artist
const NON_ARTIST_TERMS: [&str; 6] = ["original", "extended", "remix", "mix", "version", "edit"];

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Could not read tags: {0}")]
    Load(#[from] LoadError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything known about a file before it is decoded
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub title: String,
    pub artists: String,
    pub composer: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ResolvedMetadata {
    pub fn into_update(self) -> TrackUpdate {
        TrackUpdate {
            title: Some(self.title),
            artists: Some(self.artists),
            composer: self.composer,
            duration_secs: self.duration_secs,
            genre: self.genre,
            ..TrackUpdate::default()
        }
    }
}

/// Reads container tags with Symphonia
pub struct MetadataResolver;

impl MetadataResolver {
    /// Tags merged over the filename parse; fails only when the file can't be probed
    pub fn extract(locator: &str) -> Result<ResolvedMetadata, MetadataError> {
        let path = Path::new(locator);
        let mut format = probe(path)?;
        let mut resolved = parse_filename(locator);

        if let Some(track) = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        {
            let params = &track.codec_params;
            if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
                if rate > 0 {
                    resolved.duration_secs = Some(frames as f64 / f64::from(rate));
                }
            }
        }

        let tags: Vec<Tag> = match format.metadata().current() {
            Some(revision) => revision.tags().to_vec(),
            None => Vec::new(),
        };
        apply_tags(&mut resolved, &tags);
        Ok(resolved)
    }

    /// Never fails: falls back to the filename when tags are unreadable
    pub fn resolve(locator: &str) -> ResolvedMetadata {
        match Self::extract(locator) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(locator, error = %e, "metadata unavailable, using filename");
                parse_filename(locator)
            }
        }
    }
}

fn apply_tags(resolved: &mut ResolvedMetadata, tags: &[Tag]) {
    let mut artists: Vec<String> = Vec::new();
    let mut composers: Vec<String> = Vec::new();
    let mut genres: Vec<String> = Vec::new();

    for tag in tags {
        let value = tag.value.to_string().trim().to_string();
        if value.is_empty() {
            continue;
        }
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) if value != UNKNOWN_TITLE => resolved.title = value,
            Some(StandardTagKey::Artist) if value != UNKNOWN_ARTIST => artists.push(value),
            Some(StandardTagKey::Composer) => composers.push(value),
            Some(StandardTagKey::Album) => resolved.album = Some(value),
            Some(StandardTagKey::Genre) => genres.push(value),
            _ => {}
        }
    }

    if !artists.is_empty() {
        resolved.artists = artists.join(", ");
    }
    if !composers.is_empty() {
        resolved.composer = Some(composers.join(", "));
    }
    if !genres.is_empty() {
        resolved.genre = Some(genres.join(", "));
    }
}

/// Title and artist from a file name.
///
/// `Title - Artist.ext` splits on the first ` - `. Otherwise a parenthesized
/// part names the artist unless it reads like a mix name; for remixes the
/// text before "remix" becomes the composer.
pub fn parse_filename(locator: &str) -> ResolvedMetadata {
    let name = locator.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(locator);
    let name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains(' ') => stem,
        _ => name,
    };

    let mut resolved = ResolvedMetadata {
        title: UNKNOWN_TITLE.to_string(),
        artists: UNKNOWN_ARTIST.to_string(),
        composer: None,
        album: None,
        genre: None,
        duration_secs: None,
    };

    let mut parts = name.split(" - ");
    if let (Some(title), Some(artist)) = (parts.next(), parts.next()) {
        resolved.title = title.trim().to_string();
        resolved.artists = artist.trim().to_string();
        return resolved;
    }

    let Some((before, inner, after)) = first_parenthesized(name) else {
        resolved.title = name.to_string();
        return resolved;
    };

    let lowered = inner.to_lowercase();
    if NON_ARTIST_TERMS.iter().any(|t| lowered.contains(t)) {
        resolved.title = name.to_string();
        if let Some(idx) = remix_index(inner) {
            let composer = inner[..idx].trim();
            if !composer.is_empty() {
                resolved.composer = Some(composer.to_string());
            }
        }
    } else {
        resolved.title = format!("{before}{after}").trim().to_string();
        resolved.artists = inner.trim().to_string();
    }
    resolved
}

/// Text before, inside, and after the first `(...)` group
fn first_parenthesized(s: &str) -> Option<(&str, &str, &str)> {
    let open = s.find('(')?;
    let close = open + s[open..].find(')')?;
    Some((&s[..open], &s[open + 1..close], &s[close + 1..]))
}

/// Index of the first "remix" that follows whitespace
fn remix_index(s: &str) -> Option<usize> {
    let lowered = s.to_ascii_lowercase();
    let bytes = lowered.as_bytes();
    (1..bytes.len())
        .find(|&i| bytes[i - 1].is_ascii_whitespace() && lowered[i..].starts_with("remix"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_dash_artist() {
        let m = parse_filename("/music/Strobe - deadmau5.mp3");
        assert_eq!(m.title, "Strobe");
        assert_eq!(m.artists, "deadmau5");
        assert_eq!(m.composer, None);
    }

    #[test]
    fn test_parenthesized_artist() {
        let m = parse_filename("Levels (Avicii).flac");
        assert_eq!(m.title, "Levels");
        assert_eq!(m.artists, "Avicii");
    }

    #[test]
    fn test_mix_name_is_not_an_artist() {
        let m = parse_filename("Opus (Extended Mix).mp3");
        assert_eq!(m.title, "Opus (Extended Mix)");
        assert_eq!(m.artists, UNKNOWN_ARTIST);
        assert_eq!(m.composer, None);
    }

    #[test]
    fn test_remixer_becomes_composer() {
        let m = parse_filename("Silence (Tiesto Remix).mp3");
        assert_eq!(m.title, "Silence (Tiesto Remix)");
        assert_eq!(m.composer.as_deref(), Some("Tiesto"));
    }

    #[test]
    fn test_plain_name() {
        let m = parse_filename("track01.wav");
        assert_eq!(m.title, "track01");
        assert_eq!(m.artists, UNKNOWN_ARTIST);
    }

    #[test]
    fn test_into_update() {
        let update = parse_filename("A - B.mp3").into_update();
        assert_eq!(update.title.as_deref(), Some("A"));
        assert_eq!(update.artists.as_deref(), Some("B"));
        assert_eq!(update.bpm, None);
    }

    #[test]
    fn test_resolve_falls_back_to_filename() {
        let m = MetadataResolver::resolve("/nonexistent/Song - Artist.mp3");
        assert_eq!(m.title, "Song");
        assert_eq!(m.artists, "Artist");
        assert!(MetadataResolver::extract("/nonexistent/Song - Artist.mp3").is_err());
    }
}
