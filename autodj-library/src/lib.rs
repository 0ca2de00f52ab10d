//! Track library for autodj - decoding, metadata, covers, and learning storage

mod art;
mod config;
mod loader;
mod metadata;
mod scanner;
mod store;

pub use art::{clean_search_term, AlbumArtResolver, FolderArtResolver, PlaceholderArt, DEFAULT_COVER};
pub use config::{Config, ConfigError};
pub use loader::{LoadError, LoadedTrack, TrackLoader};
pub use metadata::{
    parse_filename, MetadataError, MetadataResolver, ResolvedMetadata, UNKNOWN_ARTIST, UNKNOWN_TITLE,
};
pub use scanner::{LibraryScanner, ScanConfig, ScanEvent};
pub use store::{LearningStore, StoreError};
