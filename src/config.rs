// Runtime configuration
// JSON file (optional) -> environment overrides -> CLI flags applied by the caller.

use crate::reconciliation::FuzzyMatchPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "pantry.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub image_directory: PathBuf,
    pub current_image: String,
    pub previous_image: String,
    pub test_image: String,

    /// Timestamped archives kept after each scan
    pub archive_retention: usize,

    /// Program + args that write one JPEG frame to stdout
    pub capture_command: Vec<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,

    pub fuzzy_match_policy: FuzzyMatchPolicy,

    /// Dashboard listen address
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("pantry.db"),
            image_directory: PathBuf::from("pantry_images"),
            current_image: "current.jpg".to_string(),
            previous_image: "previous.jpg".to_string(),
            test_image: "test_capture.jpg".to_string(),
            archive_retention: 0,
            capture_command: vec![
                "fswebcam".to_string(),
                "--no-banner".to_string(),
                "-r".to_string(),
                "1280x720".to_string(),
                "-S".to_string(),
                "10".to_string(),
                "-".to_string(),
            ],
            api_key: None,
            api_base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 2048,
            request_timeout_secs: 120,
            fuzzy_match_policy: FuzzyMatchPolicy::default(),
            bind_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (or `pantry.json` if present), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Overrides from `ANTHROPIC_API_KEY`, `PANTRY_DB_PATH`, `PANTRY_IMAGE_DIR`, `PANTRY_BIND_ADDR`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(path) = non_empty("PANTRY_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(dir) = non_empty("PANTRY_IMAGE_DIR") {
            self.image_directory = PathBuf::from(dir);
        }
        if let Some(addr) = non_empty("PANTRY_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is not set (environment or config file)")
    }

    pub fn current_image_path(&self) -> PathBuf {
        self.image_directory.join(&self.current_image)
    }

    pub fn previous_image_path(&self) -> PathBuf {
        self.image_directory.join(&self.previous_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.current_image_path(), PathBuf::from("pantry_images/current.jpg"));
        assert_eq!(config.fuzzy_match_policy, FuzzyMatchPolicy::MostRecentlySeen);
        assert_eq!(config.archive_retention, 0);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pantry.json");
        fs::write(
            &path,
            r#"{ "database_path": "/var/lib/pantry/pantry.db", "fuzzy_match_policy": "reject_ambiguous", "archive_retention": 5 }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/pantry/pantry.db"));
        assert_eq!(config.fuzzy_match_policy, FuzzyMatchPolicy::RejectAmbiguous);
        assert_eq!(config.archive_retention, 5);
        assert_eq!(config.previous_image, "previous.jpg");
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("PANTRY_DB_PATH", "/tmp/p.db"),
            ("PANTRY_IMAGE_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.database_path, PathBuf::from("/tmp/p.db"));
        assert_eq!(config.image_directory, PathBuf::from("pantry_images"), "empty values are ignored");
    }
}
