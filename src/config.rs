// Client configuration.
// Layered settings: defaults, then an optional JSON file, then environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::RetryPolicy;
use crate::error::{ApiError, Result};

pub const ENV_API_URL: &str = "FINOPS_API_URL";
pub const ENV_API_TOKEN: &str = "FINOPS_API_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "FINOPS_API_TIMEOUT_SECS";

const DEFAULT_BASE_URL: &str = "http://localhost:8999/restapi/v2/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }
}

/// Settings for talking to the cost-management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// TTL applied by the CLI when a request does not name one.
    pub default_ttl_secs: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_ttl_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Default location of the config file (`<config dir>/finops-api/config.json`).
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "finops-api").map(|dirs| dirs.config_dir().join("config.json"))
}

impl ApiConfig {
    /// Load from the default config file (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path().as_deref())
    }

    /// Load from `path` (if it exists) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading config file");
                Self::from_file(path)?
            }
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| ApiError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay values from environment lookups.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.token = Some(token);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = timeout
                .parse()
                .map_err(|_| ApiError::Config(format!("{} must be an integer", ENV_TIMEOUT_SECS)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| ApiError::Config(format!("invalid base_url {}: {}", self.base_url, e)))?;
        if self.retry.max_attempts == 0 {
            return Err(ApiError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ApiError::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}
