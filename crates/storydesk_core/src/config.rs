//! Resolution engine configuration.
//!
//! # Responsibility
//! - Hold calibration parameters (thresholds, field weights, arbitration
//!   retry and endpoint settings) outside of code.
//! - Load and reload them from a JSON file.
//!
//! # Invariants
//! - A config value in use has always passed `validate()`.
//! - A failed reload leaves the previously loaded config active.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Top-level engine configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionConfig {
    pub thresholds: Thresholds,
    pub index: IndexSettings,
    pub arbitration: ArbitrationSettings,
}

/// Tier boundaries over the similarity score.
///
/// Scores run from `0` (nothing shared) towards `-1` (identical text).
/// `score >= high` is NEW, `score <= low` is an automatic duplicate and
/// anything strictly between goes to arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub high: f64,
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: -0.35,
            low: -0.75,
        }
    }
}

/// Corpus index weighting and query shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexSettings {
    pub headline_weight: f64,
    pub summary_weight: f64,
    pub body_weight: f64,
    /// BM25 term-frequency saturation.
    pub k1: f64,
    /// BM25 length normalization.
    pub b: f64,
    /// Rows retrieved from FTS before re-scoring.
    pub candidate_pool: u32,
    pub max_query_terms: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            headline_weight: 10.0,
            summary_weight: 5.0,
            body_weight: 1.0,
            k1: 1.2,
            b: 0.75,
            candidate_pool: 10,
            max_query_terms: 48,
        }
    }
}

/// Arbitration call shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbitrationSettings {
    /// Matched articles shown to the arbiter per candidate.
    pub max_matches: usize,
    pub retry: RetrySettings,
    pub endpoint: EndpointSettings,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        Self {
            max_matches: 3,
            retry: RetrySettings::default(),
            endpoint: EndpointSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "cannot parse config `{}`: {source}", path.display()),
            Self::Parse { path: None, source } => write!(f, "cannot parse config: {source}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

impl ResolutionConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.thresholds.validate()?;
        self.index.validate()?;
        self.arbitration.validate()
    }
}

impl Thresholds {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.high.is_finite() || !self.low.is_finite() {
            return Err(ConfigError::Invalid(
                "thresholds must be finite numbers".to_string(),
            ));
        }
        if self.high > 0.0 {
            return Err(ConfigError::Invalid(format!(
                "high threshold {} must be <= 0",
                self.high
            )));
        }
        if self.low >= self.high {
            return Err(ConfigError::Invalid(format!(
                "low threshold {} must be below high threshold {}",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

impl IndexSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, weight) in [
            ("headline_weight", self.headline_weight),
            ("summary_weight", self.summary_weight),
            ("body_weight", self.body_weight),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "index.{name} must be a positive number, got {weight}"
                )));
            }
        }
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "index.k1 must be >= 0, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(ConfigError::Invalid(format!(
                "index.b must be within [0, 1], got {}",
                self.b
            )));
        }
        if self.candidate_pool == 0 || self.max_query_terms == 0 {
            return Err(ConfigError::Invalid(
                "index.candidate_pool and index.max_query_terms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl ArbitrationSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_matches == 0 {
            return Err(ConfigError::Invalid(
                "arbitration.max_matches must be >= 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "arbitration.retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "arbitration.retry.max_backoff_ms must be >= initial_backoff_ms".to_string(),
            ));
        }
        if self.endpoint.base_url.trim().is_empty() || self.endpoint.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "arbitration.endpoint.base_url and model must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// File-backed, reloadable configuration holder.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: ResolutionConfig,
}

impl ConfigStore {
    /// Loads the file at `path`. Fails when the initial load is invalid.
    pub fn load(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let current = ResolutionConfig::from_file(&path)?;
        info!(
            "event=config_load module=config status=ok high={} low={}",
            current.thresholds.high, current.thresholds.low
        );
        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &ResolutionConfig {
        &self.current
    }

    /// Re-reads the file. On error the active config is kept.
    pub fn reload(&mut self) -> ConfigResult<&ResolutionConfig> {
        match ResolutionConfig::from_file(&self.path) {
            Ok(next) => {
                if next.thresholds != self.current.thresholds {
                    info!(
                        "event=config_reload module=config status=ok high={} low={} previous_high={} previous_low={}",
                        next.thresholds.high,
                        next.thresholds.low,
                        self.current.thresholds.high,
                        self.current.thresholds.low
                    );
                }
                self.current = next;
                Ok(&self.current)
            }
            Err(err) => {
                warn!("event=config_reload module=config status=error kept=previous error={err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ConfigStore, ResolutionConfig};

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config =
            ResolutionConfig::from_json_str(r#"{"thresholds": {"high": -0.2, "low": -0.9}}"#)
                .unwrap();
        assert_eq!(config.thresholds.high, -0.2);
        assert_eq!(config.index.headline_weight, 10.0);
        assert_eq!(config.index.summary_weight, 5.0);
        assert_eq!(config.index.body_weight, 1.0);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = ResolutionConfig::from_json_str(r#"{"thresholds": {"high": -0.9, "low": -0.2}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ResolutionConfig::from_json_str(r#"{"treshold": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn failed_reload_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"thresholds": {"high": -0.3, "low": -0.6}}"#).unwrap();

        let mut store = ConfigStore::load(&path).unwrap();
        std::fs::write(&path, r#"{"thresholds": {"high": -0.25, "low": -0.5}}"#).unwrap();
        assert_eq!(store.reload().unwrap().thresholds.high, -0.25);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().thresholds.high, -0.25);
        assert_eq!(store.current().thresholds.low, -0.5);
    }
}
