//! Worker configuration.
//!
//! Loaded from TOML; every field has a default so a partial (or absent)
//! file still yields a working worker.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hoist_control::RetryPolicy;
use hoist_control::retry::RETRY_STATUS_CODES;
use hoist_protocol::RetryOverrides;

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed chunk size for new uploads, in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Per-upload ceiling on concurrent part PUTs.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Base URL of the control-plane API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Largest admissible source file, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// MIME types accepted by START_UPLOAD.
    #[serde(default = "default_allowed_file_types")]
    pub allowed_file_types: Vec<String>,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub acceleration: AccelerationSettings,
}

/// Retry budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "default_retry_status_codes")]
    pub status_codes: Vec<u16>,
}

/// Transfer-acceleration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelerationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files below this size never use acceleration.
    #[serde(default = "default_acceleration_min_size")]
    pub min_size: u64,
    /// Endpoint used on resume, when the initiate-time endpoint is no
    /// longer known.
    #[serde(default = "default_acceleration_endpoint")]
    pub default_endpoint: String,
}

fn default_part_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_api_base_url() -> String {
    "/api".into()
}

fn default_api_timeout_secs() -> u64 {
    180
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_allowed_file_types() -> Vec<String> {
    vec![
        "video/mp4".into(),
        "video/quicktime".into(),
        "video/x-msvideo".into(),
    ]
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_jitter_factor() -> f64 {
    0.2
}

fn default_retry_status_codes() -> Vec<u16> {
    RETRY_STATUS_CODES.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_acceleration_min_size() -> u64 {
    512 * 1024 * 1024
}

fn default_acceleration_endpoint() -> String {
    "s3-accelerate.amazonaws.com".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            api_base_url: default_api_base_url(),
            api_timeout_secs: default_api_timeout_secs(),
            max_file_size: default_max_file_size(),
            allowed_file_types: default_allowed_file_types(),
            retry: RetrySettings::default(),
            acceleration: AccelerationSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_factor: default_retry_jitter_factor(),
            status_codes: default_retry_status_codes(),
        }
    }
}

impl Default for AccelerationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_size: default_acceleration_min_size(),
            default_endpoint: default_acceleration_endpoint(),
        }
    }
}

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl WorkerConfig {
    /// Loads configuration from a TOML file; a missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn is_type_allowed(&self, file_type: &str) -> bool {
        self.allowed_file_types.iter().any(|t| t == file_type)
    }
}

impl RetrySettings {
    /// Backoff policy for the default budget.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            base_delay: Duration::from_millis(self.delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
        }
    }

    /// Backoff policy with per-upload overrides applied.
    pub fn policy_with(&self, overrides: Option<RetryOverrides>) -> RetryPolicy {
        let mut policy = self.policy();
        if let Some(o) = overrides {
            if let Some(attempts) = o.attempts {
                policy.attempts = attempts;
            }
            if let Some(delay) = o.delay_ms {
                policy.base_delay = Duration::from_millis(delay);
            }
            if let Some(max) = o.max_delay_ms {
                policy.max_delay = Duration::from_millis(max);
            }
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_options() {
        let config = WorkerConfig::default();
        assert_eq!(config.part_size, 10 * 1024 * 1024);
        assert_eq!(config.max_concurrent_uploads, 5);
        assert_eq!(config.api_base_url, "/api");
        assert_eq!(config.api_timeout(), Duration::from_secs(180));
        assert_eq!(config.max_file_size, 10 * 1024 * 1024 * 1024);
        assert!(config.is_type_allowed("video/mp4"));
        assert!(config.is_type_allowed("video/quicktime"));
        assert!(config.is_type_allowed("video/x-msvideo"));
        assert!(!config.is_type_allowed("application/pdf"));

        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.status_codes, RETRY_STATUS_CODES.to_vec());

        assert!(config.acceleration.enabled);
        assert_eq!(config.acceleration.min_size, 512 * 1024 * 1024);
        assert_eq!(
            config.acceleration.default_endpoint,
            "s3-accelerate.amazonaws.com"
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            part_size = 5242880

            [retry]
            attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.part_size, 5_242_880);
        assert_eq!(config.retry.attempts, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.max_concurrent_uploads, 5);
        assert!(config.acceleration.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.part_size, 10 * 1024 * 1024);
    }

    #[test]
    fn load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        let mut config = WorkerConfig::default();
        config.api_base_url = "https://api.example.com".into();
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = WorkerConfig::load(&path).unwrap();
        assert_eq!(loaded.api_base_url, "https://api.example.com");
    }

    #[test]
    fn retry_overrides_apply() {
        let settings = RetrySettings::default();
        let policy = settings.policy_with(Some(RetryOverrides {
            attempts: Some(6),
            delay_ms: Some(500),
            max_delay_ms: None,
        }));
        assert_eq!(policy.attempts, 6);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(30_000));

        let unchanged = settings.policy_with(None);
        assert_eq!(unchanged.attempts, 3);
    }
}
