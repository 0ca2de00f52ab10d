//! Music folder scanner with background track resolution
//!
//! Builds the playlist from a directory, then resolves each track on worker
//! threads: metadata and cover first, BPM once the file is decoded. Results
//! arrive as [`ScanEvent`]s that the control loop applies with
//! `PlaybackPipeline::update_track`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use autodj_analysis::BpmDetector;
use autodj_audio::{Track, TrackId, TrackUpdate};
use crossbeam_channel::{self, Receiver, Sender};

use crate::art::{AlbumArtResolver, FolderArtResolver};
use crate::loader::TrackLoader;
use crate::metadata::MetadataResolver;

/// Rate tracks are decoded at for tempo detection
const BPM_SAMPLE_RATE: u32 = 22050;

/// Directory scanning settings
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub directory: PathBuf,
    /// File extensions to include
    pub extensions: Vec<String>,
    /// Maximum number of resolver threads
    pub max_threads: usize,
    /// Whether to scan subdirectories recursively
    pub recursive: bool,
    /// Decode every track to estimate its tempo
    pub detect_bpm: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            extensions: vec![
                "mp3".into(),
                "flac".into(),
                "wav".into(),
                "ogg".into(),
                "m4a".into(),
                "aac".into(),
            ],
            max_threads: 4,
            recursive: true,
            detect_bpm: true,
        }
    }
}

/// Progress from the resolver threads
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// New facts about a track
    Update(TrackId, TrackUpdate),
    /// Tempo detection failed; the track keeps the default BPM
    Failed { id: TrackId, message: String },
    /// Every track has been processed
    Complete { resolved: usize, failed: usize },
}

pub struct LibraryScanner {
    config: ScanConfig,
}

impl LibraryScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Playlist stubs for every audio file, sorted by path
    pub fn playlist(&self) -> Vec<Track> {
        let files = collect_files(&self.config.directory, &self.config.extensions, self.config.recursive);
        tracing::info!(
            directory = %self.config.directory.display(),
            tracks = files.len(),
            "music folder scanned"
        );
        files
            .iter()
            .enumerate()
            .map(|(i, path)| Track::new(TrackId(i as u64), path.display().to_string()))
            .collect()
    }

    /// Resolve metadata, covers and tempo of `tracks` in the background
    pub fn resolve_async(&self, tracks: &[Track]) -> (Receiver<ScanEvent>, JoinHandle<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let work: Vec<(TrackId, String)> = tracks.iter().map(|t| (t.id, t.locator.clone())).collect();
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            let art = Arc::new(FolderArtResolver::scan(&config.directory));
            resolve_all(work, &config, art, &tx);
        });

        (rx, handle)
    }
}

fn resolve_all(
    work: Vec<(TrackId, String)>,
    config: &ScanConfig,
    art: Arc<FolderArtResolver>,
    events: &Sender<ScanEvent>,
) {
    let thread_count = config.max_threads.min(work.len()).max(1);
    let (work_tx, work_rx) = crossbeam_channel::unbounded();
    for item in work {
        let _ = work_tx.send(item);
    }
    drop(work_tx);

    let mut handles = Vec::new();
    for _ in 0..thread_count {
        let work_rx = work_rx.clone();
        let events = events.clone();
        let art = Arc::clone(&art);
        let detect_bpm = config.detect_bpm;

        handles.push(thread::spawn(move || {
            let loader = TrackLoader::with_sample_rate(BPM_SAMPLE_RATE);
            let detector = BpmDetector::new(BPM_SAMPLE_RATE, 2);
            let (mut resolved, mut failed) = (0usize, 0usize);

            for (id, locator) in work_rx {
                let _ = events.send(ScanEvent::Update(id, describe(&locator, art.as_ref())));
                if !detect_bpm {
                    resolved += 1;
                    continue;
                }
                match loader.decode(Path::new(&locator)) {
                    Ok(track) => {
                        let bpm = detector.detect(&track.samples).map(|b| b as f32);
                        tracing::debug!(locator = %locator, ?bpm, "tempo detected");
                        let update = TrackUpdate {
                            bpm,
                            duration_secs: Some(track.duration_secs),
                            ..TrackUpdate::default()
                        };
                        let _ = events.send(ScanEvent::Update(id, update));
                        resolved += 1;
                    }
                    Err(e) => {
                        tracing::warn!(locator = %locator, error = %e, "tempo detection failed");
                        let _ = events.send(ScanEvent::Failed {
                            id,
                            message: e.to_string(),
                        });
                        failed += 1;
                    }
                }
            }
            (resolved, failed)
        }));
    }

    let (mut resolved, mut failed) = (0, 0);
    for handle in handles {
        if let Ok((r, f)) = handle.join() {
            resolved += r;
            failed += f;
        }
    }
    let _ = events.send(ScanEvent::Complete { resolved, failed });
}

/// Metadata and cover of one file
fn describe(locator: &str, art: &FolderArtResolver) -> TrackUpdate {
    let metadata = MetadataResolver::resolve(locator);
    let cover = art
        .cover_for(locator)
        .unwrap_or_else(|| art.album_art(&metadata.title, &metadata.artists));
    TrackUpdate {
        cover: Some(cover),
        ..metadata.into_update()
    }
}

/// Collect all audio files under a directory
fn collect_files(dir: &Path, extensions: &[String], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read directory");
            return files;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    files.push(path);
                }
            }
        } else if path.is_dir() && recursive {
            files.extend(collect_files(&path, extensions, recursive));
        }
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::DEFAULT_COVER;
    use std::fs;

    fn folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b - Second.mp3"), b"not audio").unwrap();
        fs::write(dir.path().join("A - First.FLAC"), b"not audio").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("c.wav"), b"not audio").unwrap();
        dir
    }

    fn config(dir: &Path) -> ScanConfig {
        ScanConfig {
            directory: dir.to_path_buf(),
            ..ScanConfig::default()
        }
    }

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert_eq!(config.max_threads, 4);
        assert!(config.recursive);
        assert!(config.detect_bpm);
        assert!(config.extensions.contains(&"mp3".to_string()));
    }

    #[test]
    fn test_missing_directory() {
        let files = collect_files(Path::new("/nonexistent"), &["mp3".into()], true);
        assert!(files.is_empty());
    }

    #[test]
    fn test_playlist() {
        let dir = folder();
        let tracks = LibraryScanner::new(config(dir.path())).playlist();
        let names: Vec<_> = tracks
            .iter()
            .map(|t| Path::new(&t.locator).file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["A - First.FLAC", "b - Second.mp3", "c.wav"]);
        assert_eq!(tracks[2].id, TrackId(2));
        assert!(tracks.iter().all(|t| t.title == autodj_audio::LOADING_TITLE));

        let flat = ScanConfig {
            recursive: false,
            ..config(dir.path())
        };
        assert_eq!(LibraryScanner::new(flat).playlist().len(), 2);
    }

    #[test]
    fn test_resolve_reports_every_track() {
        let dir = folder();
        let scanner = LibraryScanner::new(config(dir.path()));
        let tracks = scanner.playlist();
        let (rx, handle) = scanner.resolve_async(&tracks);
        handle.join().unwrap();
        let events: Vec<ScanEvent> = rx.try_iter().collect();

        let first = events
            .iter()
            .find_map(|e| match e {
                ScanEvent::Update(TrackId(0), update) => Some(update.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(first.title.as_deref(), Some("A"));
        assert_eq!(first.artists.as_deref(), Some("First"));
        assert_eq!(first.cover.as_deref(), Some(DEFAULT_COVER));

        // The files are not decodable, so tempo detection fails for all three
        let failures = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Failed { .. }))
            .count();
        assert_eq!(failures, 3);
        assert_eq!(
            events.last(),
            Some(&ScanEvent::Complete {
                resolved: 0,
                failed: 3
            })
        );
    }

    #[test]
    fn test_resolve_without_bpm() {
        let dir = folder();
        let scanner = LibraryScanner::new(ScanConfig {
            detect_bpm: false,
            max_threads: 1,
            ..config(dir.path())
        });
        let tracks = scanner.playlist();
        let (rx, handle) = scanner.resolve_async(&tracks);
        handle.join().unwrap();
        let events: Vec<ScanEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[3],
            ScanEvent::Complete {
                resolved: 3,
                failed: 0
            }
        );
    }
}
