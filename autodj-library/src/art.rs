//! Album art lookup
//!
//! Art always resolves to something: a cover image found next to the music,
//! or the placeholder vinyl.

use std::path::{Path, PathBuf};

/// Shown when no cover is found
pub const DEFAULT_COVER: &str = "https://dj.beatport.com/picx/vinyl_default2.png";

/// Words dropped from search terms (matched anywhere, case-insensitive)
const NOISE_TERMS: [&str; 6] = ["original", "extended", "remix", "mix", "version", "edit"];

/// File stems tried, in order, for a directory-wide cover
const COVER_STEMS: [&str; 5] = ["cover", "folder", "front", "album", "artwork"];

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

pub trait AlbumArtResolver: Send + Sync {
    /// Cover locator for a song; never empty
    fn album_art(&self, title: &str, artist: &str) -> String;
}

/// Always the placeholder
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderArt;

impl AlbumArtResolver for PlaceholderArt {
    fn album_art(&self, _title: &str, _artist: &str) -> String {
        DEFAULT_COVER.to_string()
    }
}

/// Finds cover images among the files of a music folder
#[derive(Debug, Clone, Default)]
pub struct FolderArtResolver {
    /// (cleaned lowercase stem, path)
    images: Vec<(String, PathBuf)>,
}

impl FolderArtResolver {
    /// Index every image under `folder`
    pub fn scan(folder: &Path) -> Self {
        let mut images = Vec::new();
        collect_images(folder, &mut images);
        images.sort();
        tracing::debug!(folder = %folder.display(), count = images.len(), "cover images indexed");
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Cover sitting in the same directory as `locator`
    pub fn cover_for(&self, locator: &str) -> Option<String> {
        let dir = Path::new(locator).parent()?;
        COVER_STEMS.iter().find_map(|stem| {
            self.images
                .iter()
                .find(|(name, path)| name == stem && path.parent() == Some(dir))
                .map(|(_, path)| path.display().to_string())
        })
    }

    fn named(&self, term: &str) -> Option<String> {
        if term.is_empty() {
            return None;
        }
        self.images
            .iter()
            .find(|(name, _)| name == term)
            .map(|(_, path)| path.display().to_string())
    }
}

impl AlbumArtResolver for FolderArtResolver {
    fn album_art(&self, title: &str, artist: &str) -> String {
        let title = clean_search_term(title).to_lowercase();
        let artist = clean_search_term(artist).to_lowercase();
        let combined = normalize_spaces(&format!("{title} {artist}"));

        self.named(&combined)
            .or_else(|| self.named(&normalize_spaces(&title)))
            .or_else(|| {
                COVER_STEMS.iter().find_map(|stem| self.named(stem))
            })
            .unwrap_or_else(|| DEFAULT_COVER.to_string())
    }
}

fn collect_images(dir: &Path, out: &mut Vec<(String, PathBuf)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_images(&path, out);
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| i.eq_ignore_ascii_case(ext)));
        if !is_image {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            let key = normalize_spaces(&clean_search_term(stem).to_lowercase());
            out.push((key, path));
        }
    }
}

/// Strip parenthesized text, mix words and punctuation from a search term
pub fn clean_search_term(term: &str) -> String {
    let mut without_parens = String::with_capacity(term.len());
    let mut rest = term;
    while let Some(open) = rest.find('(') {
        match rest[open..].find(')') {
            Some(close) => {
                without_parens.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    without_parens.push_str(rest);

    let without_noise = remove_terms(&without_parens);
    without_noise
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

fn remove_terms(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hit = NOISE_TERMS.iter().find(|t| {
            bytes.len() - i >= t.len() && bytes[i..i + t.len()].eq_ignore_ascii_case(t.as_bytes())
        });
        match hit {
            Some(t) => i += t.len(),
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
