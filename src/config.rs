//! Run configuration.
//!
//! `ConfigFile` is the JSON schema (every key optional). `Config` is the
//! validated, immutable value handed to each component: compiled removal
//! patterns, version keywords, thresholds and retry policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::atomic;
use crate::classify::{Thresholds, DEFAULT_REVIEW_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD};
use crate::error::{Result, SyncError};
use crate::normalize::{NormalizationRules, DEFAULT_REMOVAL_PATTERNS};
use crate::retry::RetryPolicy;
use crate::version::{VersionKeywords, DEFAULT_VERSION_KEYWORDS};

pub const DEFAULT_CONFIG_FILENAME: &str = "liked-sync.json";

pub const DEFAULT_EXTENSIONS: &[&str] = &[".mp3", ".flac", ".m4a", ".wav", ".ogg", ".opus", ".aac"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub removal_patterns: Vec<String>,
    pub version_keywords: Vec<String>,
    pub similarity_threshold: u32,
    pub review_threshold: u32,
    pub max_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub supported_extensions: Vec<String>,
    pub search_result_limit: usize,
    /// `{}` placeholders: collection name, then date.
    pub playlist_name_template: String,
    pub missing_links_file: String,
    pub missing_details_file: String,
    pub annotated_report_file: String,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            removal_patterns: DEFAULT_REMOVAL_PATTERNS.iter().map(|s| s.to_string()).collect(),
            version_keywords: DEFAULT_VERSION_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD as u32,
            review_threshold: DEFAULT_REVIEW_THRESHOLD as u32,
            max_attempts: 3,
            initial_retry_delay_ms: 5000,
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            search_result_limit: 5,
            playlist_name_template: "Missing From {} ({})".to_string(),
            missing_links_file: "missing_links.txt".to_string(),
            missing_details_file: "missing_details.tsv".to_string(),
            annotated_report_file: "matched_with_notes.tsv".to_string(),
        }
    }
}

/// Validated configuration. Built once, before any catalog work.
#[derive(Debug, Clone)]
pub struct Config {
    pub rules: NormalizationRules,
    pub version_keywords: VersionKeywords,
    pub thresholds: Thresholds,
    pub retry: RetryPolicy,
    pub supported_extensions: Vec<String>,
    pub search_result_limit: usize,
    pub playlist_name_template: String,
    pub missing_links_file: String,
    pub missing_details_file: String,
    pub annotated_report_file: String,
}

fn threshold(name: &str, value: u32) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| SyncError::Config(format!("{} must be within 0..=100, got {}", name, value)))
}

impl Config {
    /// Validate a parsed file.
    pub fn from_raw(raw: ConfigFile) -> Result<Self> {
        let thresholds = Thresholds::new(
            threshold("similarity_threshold", raw.similarity_threshold)?,
            threshold("review_threshold", raw.review_threshold)?,
        )?;
        let retry = RetryPolicy::new(raw.max_attempts, Duration::from_millis(raw.initial_retry_delay_ms))?;

        if raw.supported_extensions.is_empty() {
            return Err(SyncError::Config("supported_extensions is empty".into()));
        }
        if let Some(bad) = raw
            .supported_extensions
            .iter()
            .find(|e| !e.starts_with('.') || e.len() < 2)
        {
            return Err(SyncError::Config(format!(
                "extension {:?} must start with a dot",
                bad
            )));
        }
        if raw.search_result_limit == 0 {
            return Err(SyncError::Config("search_result_limit must be at least 1".into()));
        }
        if raw.playlist_name_template.trim().is_empty() {
            return Err(SyncError::Config("playlist_name_template is empty".into()));
        }

        Ok(Self {
            rules: NormalizationRules::new(&raw.removal_patterns)?,
            version_keywords: VersionKeywords::new(&raw.version_keywords)?,
            thresholds,
            retry,
            supported_extensions: raw
                .supported_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            search_result_limit: raw.search_result_limit,
            playlist_name_template: raw.playlist_name_template,
            missing_links_file: raw.missing_links_file,
            missing_details_file: raw.missing_details_file,
            annotated_report_file: raw.annotated_report_file,
        })
    }

    /// Load and validate a config file. A missing file means defaults; a
    /// malformed one is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = match atomic::read_json::<ConfigFile>(path) {
            Ok(Some(raw)) => {
                tracing::info!("Loaded configuration from {}", path.display());
                raw
            }
            Ok(None) => {
                tracing::warn!(
                    "Configuration file {} not found, using defaults",
                    path.display()
                );
                ConfigFile::default()
            }
            Err(e) => {
                return Err(SyncError::Config(format!("{}: {}", path.display(), e)));
            }
        };
        Self::from_raw(raw)
    }

    /// Override thresholds (e.g. from the command line) and re-validate.
    pub fn with_thresholds(mut self, similarity: Option<u8>, review: Option<u8>) -> Result<Self> {
        self.thresholds = Thresholds::new(
            threshold("similarity threshold", similarity.unwrap_or(self.thresholds.similarity) as u32)?,
            threshold("review threshold", review.unwrap_or(self.thresholds.review) as u32)?,
        )?;
        Ok(self)
    }

    /// Fill the playlist name template: first `{}` is the collection name,
    /// second the date.
    pub fn playlist_name(&self, collection: &str, date: &str) -> String {
        let mut out = String::with_capacity(self.playlist_name_template.len() + 32);
        let mut values = [collection, date].into_iter();
        let mut parts = self.playlist_name_template.split("{}").peekable();
        while let Some(part) = parts.next() {
            out.push_str(part);
            if parts.peek().is_some() {
                out.push_str(values.next().unwrap_or(""));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = Config::from_raw(ConfigFile::default()).unwrap();
        assert_eq!(config.thresholds, Thresholds::new(85, 75).unwrap());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(5));
        assert_eq!(config.supported_extensions.len(), 7);
        assert_eq!(config.search_result_limit, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.thresholds.similarity, 85);
    }

    #[test]
    fn test_partial_file_overrides_some_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"similarity_threshold": 90, "supported_extensions": [".MP3"]}"#).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.thresholds.similarity, 90);
        assert_eq!(config.thresholds.review, 75);
        assert_eq!(config.supported_extensions, vec![".mp3".to_string()]);
    }

    #[test]
    fn test_malformed_file_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ similarity_threshold: }").unwrap();
        assert!(matches!(Config::from_file(&path), Err(SyncError::Config(_))));

        fs::write(&path, r#"{"similarity_treshold": 90}"#).unwrap();
        assert!(matches!(Config::from_file(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            ConfigFile {
                similarity_threshold: 101,
                ..Default::default()
            },
            ConfigFile {
                review_threshold: 90,
                ..Default::default()
            },
            ConfigFile {
                max_attempts: 0,
                ..Default::default()
            },
            ConfigFile {
                removal_patterns: vec!["[unclosed".into()],
                ..Default::default()
            },
            ConfigFile {
                supported_extensions: vec!["mp3".into()],
                ..Default::default()
            },
            ConfigFile {
                supported_extensions: vec![],
                ..Default::default()
            },
        ];
        for raw in bad {
            assert!(matches!(Config::from_raw(raw.clone()), Err(SyncError::Config(_))), "{:?}", raw);
        }
    }

    #[test]
    fn test_with_thresholds_revalidates() {
        let config = Config::from_raw(ConfigFile::default()).unwrap();
        let lowered = config.clone().with_thresholds(Some(80), Some(60)).unwrap();
        assert_eq!(lowered.thresholds, Thresholds::new(80, 60).unwrap());
        assert!(config.clone().with_thresholds(None, Some(95)).is_err());
        assert!(config.with_thresholds(Some(150), None).is_err());
    }

    #[test]
    fn test_playlist_name() {
        let config = Config::from_raw(ConfigFile::default()).unwrap();
        assert_eq!(config.playlist_name("Music", "2024-05-01"), "Missing From Music (2024-05-01)");
    }
}
