//! Configuration persistence for autodj
//!
//! Simple `key=value` lines; unknown keys are ignored and values that fail
//! to parse keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use autodj_audio::{PipelineConfig, TRANSITION_WINDOW_SECS};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No config directory on this platform")]
    NoConfigDir,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Folder played when none is given on the command line
    pub music_folder: Option<PathBuf>,
    pub transition_window_secs: f64,
    pub phrase_align: bool,
    pub analysis_interval_secs: f64,
    /// Persist advisor learning between sessions
    pub learning_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            music_folder: None,
            transition_window_secs: TRANSITION_WINDOW_SECS,
            phrase_align: false,
            analysis_interval_secs: 1.0,
            learning_enabled: true,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns the default config if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("autodj").join("config"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Where advisor learning is stored
    pub fn learning_db_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("autodj").join("learning.db"))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            transition_window_secs: self.transition_window_secs,
            phrase_align: self.phrase_align,
            analysis_interval_secs: self.analysis_interval_secs,
            ..PipelineConfig::default()
        }
    }

    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "music_folder" => {
                    if !value.is_empty() {
                        config.music_folder = Some(PathBuf::from(value));
                    }
                }
                "transition_window_secs" => {
                    if let Some(v) = positive(value) {
                        config.transition_window_secs = v;
                    }
                }
                "phrase_align" => {
                    if let Ok(v) = value.parse() {
                        config.phrase_align = v;
                    }
                }
                "analysis_interval_secs" => {
                    if let Some(v) = positive(value) {
                        config.analysis_interval_secs = v;
                    }
                }
                "learning_enabled" => {
                    if let Ok(v) = value.parse() {
                        config.learning_enabled = v;
                    }
                }
                _ => tracing::debug!(key, "ignoring unknown config key"),
            }
        }

        config
    }

    fn serialize(&self) -> String {
        let mut lines = vec!["# autodj configuration".to_string()];
        if let Some(folder) = &self.music_folder {
            lines.push(format!("music_folder={}", folder.display()));
        }
        lines.push(format!("transition_window_secs={}", self.transition_window_secs));
        lines.push(format!("phrase_align={}", self.phrase_align));
        lines.push(format!("analysis_interval_secs={}", self.analysis_interval_secs));
        lines.push(format!("learning_enabled={}", self.learning_enabled));
        lines.join("\n")
    }
}

fn positive(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::parse(""), Config::default());
    }

    #[test]
    fn test_parse_values() {
        let config = Config::parse(
            "# Comment\nmusic_folder=/music\ntransition_window_secs=12.5\nphrase_align=true\nlearning_enabled=false",
        );
        assert_eq!(config.music_folder, Some(PathBuf::from("/music")));
        assert_eq!(config.transition_window_secs, 12.5);
        assert!(config.phrase_align);
        assert!(!config.learning_enabled);
        assert_eq!(config.analysis_interval_secs, 1.0);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = Config::parse("transition_window_secs=-3\nphrase_align=maybe\nanalysis_interval_secs=abc\ncolor=red");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_pipeline_config() {
        let config = Config {
            transition_window_secs: 8.0,
            phrase_align: true,
            ..Config::default()
        };
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.transition_window_secs, 8.0);
        assert!(pipeline.phrase_align);
        assert_eq!(pipeline.seed, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");
        let config = Config {
            music_folder: Some(PathBuf::from("/test/path")),
            analysis_interval_secs: 0.5,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert!(Config::load_from(&dir.path().join("missing")).is_err());
    }
}
