use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_MIN_SONG_DURATION: f64 = 30.0;
pub const DEFAULT_THRESHOLD: f64 = 0.3;
/// 0.5 requests per second.
pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Which recognition service to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Shazam,
    Songrec,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Shazam => f.write_str("shazam"),
            Backend::Songrec => f.write_str("songrec"),
        }
    }
}

/// Configuration defaults that can be saved to a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_song_duration: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_seconds: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path (~/.state/tracklister/defaults.toml)
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::NoHome)?;
        Ok(Path::new(&home).join(".state").join("tracklister").join("defaults.toml"))
    }

    /// Load config from the default location; a missing file is an empty config.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Merge this config with another, preferring values from other
    pub fn merge(&mut self, other: &Config) {
        fn take<T: Clone>(mine: &mut Option<T>, theirs: &Option<T>) {
            if theirs.is_some() {
                *mine = theirs.clone();
            }
        }
        take(&mut self.min_song_duration, &other.min_song_duration);
        take(&mut self.threshold, &other.threshold);
        take(&mut self.request_interval_ms, &other.request_interval_ms);
        take(&mut self.max_in_flight, &other.max_in_flight);
        take(&mut self.backend, &other.backend);
        take(&mut self.language, &other.language);
        take(&mut self.endpoint_country, &other.endpoint_country);
        take(&mut self.segment_seconds, &other.segment_seconds);
        take(&mut self.output_dir, &other.output_dir);
        take(&mut self.debug, &other.debug);
    }

    /// Print the config in a human-readable format
    pub fn print(&self, title: &str) {
        println!("{}:", title);

        if let Some(v) = self.min_song_duration {
            println!("  Min song duration:  {} seconds", v);
        }
        if let Some(v) = self.threshold {
            println!("  Peak threshold:     {}", v);
        }
        if let Some(v) = self.request_interval_ms {
            println!("  Request interval:   {} ms", v);
        }
        if let Some(v) = self.max_in_flight {
            println!("  Max in flight:      {}", v);
        }
        if let Some(v) = self.backend {
            println!("  Backend:            {}", v);
        }
        if let Some(v) = &self.language {
            println!("  Language:           {}", v);
        }
        if let Some(v) = &self.endpoint_country {
            println!("  Endpoint country:   {}", v);
        }
        if let Some(v) = self.segment_seconds {
            println!("  Fingerprint window: {} seconds", v);
        }
        if let Some(v) = &self.output_dir {
            println!("  Output directory:   {}", v.display());
        }
        if let Some(v) = self.debug {
            println!("  Debug logging:      {}", if v { "enabled" } else { "disabled" });
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            min_song_duration: self.min_song_duration.unwrap_or(DEFAULT_MIN_SONG_DURATION),
            peak_threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
            artifact_dir: None,
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms.unwrap_or(DEFAULT_REQUEST_INTERVAL_MS))
    }

    /// A limiter for the configured backend: the configured spacing, up to
    /// 16× that after repeated failures, narrowing again after 10 successes.
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        let base = self.request_interval();
        RateLimiter::new(
            &self.backend.unwrap_or_default().to_string(),
            self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            base,
            base * 16,
            10,
        )
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config {
            min_song_duration: Some(45.0),
            threshold: Some(0.2),
            language: Some("en-US".to_string()),
            ..Config::default()
        };
        let overrides = Config {
            threshold: Some(0.5),
            backend: Some(Backend::Songrec),
            ..Config::default()
        };
        base.merge(&overrides);

        assert_eq!(base.min_song_duration, Some(45.0));
        assert_eq!(base.threshold, Some(0.5));
        assert_eq!(base.backend, Some(Backend::Songrec));
        assert_eq!(base.language.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_defaults_resolve() {
        let config = Config::new();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.min_song_duration, 30.0);
        assert_eq!(pipeline.peak_threshold, 0.3);
        assert_eq!(config.request_interval(), Duration::from_millis(2000));
        assert_eq!(config.rate_limiter().name(), "shazam");
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("defaults.toml");
        let config = Config {
            min_song_duration: Some(60.0),
            backend: Some(Backend::Songrec),
            output_dir: Some(PathBuf::from("/tmp/out")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("backend = \"songrec\""));
        assert!(!text.contains("threshold"));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("none.toml")).unwrap(), Config::new());

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "threshold = \"high\"").unwrap();
        assert!(matches!(Config::load_from(&bad), Err(ConfigError::Parse(_))));
    }
}
