//! Configuration module for Verity Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! store:
//!   endpoint: "${STORE_URL}"
//!   api_key: "${STORE_KEY}"
//!   bucket: "verification-videos"
//! records:
//!   table: "models"
//!   key_column: "id"
//!   reference_column: "verification_video_url"
//! upload:
//!   max_bytes: 52428800
//!   media_prefix: "video/"
//!   max_attempts: 3
//!   backoff_step_secs: 2
//!   watchdog: "attempt"
//! session:
//!   path: "${HOME:-.}/.verity-session.json"
//! logging:
//!   level: "info"
//!   format: "json"
//! ```

use crate::upload::deadline::DeadlinePolicy;
use crate::upload::pipeline::{UploadPolicy, WatchdogScope};
use crate::upload::validation::Constraints;
use crate::upload::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub records: Option<RecordsConfig>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.store.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid store endpoint '{}': must start with http:// or https://",
                self.store.endpoint
            )));
        }

        if self.store.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.bucket cannot be empty".into(),
            ));
        }

        if let Some(ref records) = self.records {
            if records.table.trim().is_empty() || records.reference_column.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "records.table and records.reference_column cannot be empty".into(),
                ));
            }
        }

        if self.upload.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_attempts must be at least 1".into(),
            ));
        }

        if self.upload.max_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_bytes must be greater than 0".into(),
            ));
        }

        if !self.upload.deadlines.is_monotonic() {
            return Err(ConfigError::ValidationError(format!(
                "upload.deadlines must be non-zero and non-decreasing, got {}/{}/{}",
                self.upload.deadlines.small_secs,
                self.upload.deadlines.medium_secs,
                self.upload.deadlines.large_secs
            )));
        }

        Ok(())
    }
}

/// Hosted object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub api_key: String,
    pub bucket: String,
    /// Overwrite an existing object at the destination path. Default: false
    #[serde(default)]
    pub upsert: bool,
}

/// Row that receives the public reference of an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    pub table: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    pub reference_column: String,
}

fn default_key_column() -> String {
    "id".to_string()
}

/// Upload policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Required media type prefix; empty string accepts any type
    #[serde(default = "default_media_prefix")]
    pub media_prefix: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,
    #[serde(default)]
    pub watchdog: WatchdogScope,
    #[serde(default = "default_probe")]
    pub probe: bool,
    #[serde(default)]
    pub deadlines: DeadlinePolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            media_prefix: default_media_prefix(),
            max_attempts: default_max_attempts(),
            backoff_step_secs: default_backoff_step_secs(),
            watchdog: WatchdogScope::default(),
            probe: default_probe(),
            deadlines: DeadlinePolicy::default(),
        }
    }
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_media_prefix() -> String {
    "video/".to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_step_secs() -> u64 {
    2
}

fn default_probe() -> bool {
    true
}

impl Config {
    /// Pipeline policy derived from the `upload` and `store` sections
    pub fn upload_policy(&self) -> UploadPolicy {
        let media_prefix = Some(self.upload.media_prefix.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        UploadPolicy {
            constraints: Constraints {
                max_bytes: self.upload.max_bytes,
                media_prefix,
            },
            max_attempts: self.upload.max_attempts,
            backoff_step: Duration::from_secs(self.upload.backoff_step_secs),
            deadlines: self.upload.deadlines,
            watchdog: self.upload.watchdog,
            probe: self.upload.probe,
            upsert: self.store.upsert,
        }
    }
}

/// Where the signed-in session is kept between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub path: PathBuf,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `verity_uploadr=debug`. RUST_LOG wins.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Dump the metrics exposition to stderr on exit. Default: false
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn minimal() -> Config {
        serde_yaml::from_str(
            r#"
store:
  endpoint: "https://project.example.co"
  api_key: "key"
  bucket: "verification-videos"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_in() {
        let config = minimal();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.watchdog, WatchdogScope::Attempt);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.records.is_none());
    }

    #[test]
    fn test_upload_policy_mapping() {
        let mut config = minimal();
        config.upload.media_prefix = String::new();
        config.upload.backoff_step_secs = 5;

        let policy = config.upload_policy();
        assert_eq!(policy.constraints.media_prefix, None);
        assert_eq!(policy.backoff_step, Duration::from_secs(5));
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = minimal();
        config.store.endpoint = "project.example.co".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = minimal();
        config.upload.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_deadline_bands() {
        let mut config = minimal();
        config.upload.deadlines.medium_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("VERITY_MISSING");
        assert_eq!(expand_env_vars("${VERITY_MISSING:-fallback}"), "fallback");
        assert_eq!(expand_env_vars("${VERITY_MISSING}"), "${VERITY_MISSING}");

        std::env::set_var("VERITY_PRESENT", "value");
        assert_eq!(expand_env_vars("a-${VERITY_PRESENT}-b"), "a-value-b");
        std::env::remove_var("VERITY_PRESENT");
    }
}
