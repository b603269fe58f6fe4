//! Client configuration loaded from `simcloud.toml`.
//!
//! [`SimConfig`] holds every tunable. Values missing from the file fall back
//! to defaults. Environment variables take precedence over the file for the
//! API endpoint, credentials and cache location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::poller::PollPolicy;
use crate::transport::RetryPolicy;

pub const CONFIG_FILE: &str = "simcloud.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Base URL of the job API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key exchanged for bearer tokens.
    #[serde(default)]
    pub api_key: String,

    /// Pre-issued bearer token. Takes the place of `api_key` when set.
    #[serde(default)]
    pub token: Option<String>,

    /// Local secret store for the last issued token.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// Root directory of the artifact cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub poll: PollSection,
}

/// `[retry]` table: backoff for individual requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// `[poll]` table: status polling cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSection {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
}

fn default_api_url() -> String {
    "https://api.simcloud.dev/v1".to_string()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_token_file() -> PathBuf {
    home_dir().join(".simcloud").join("token.json")
}

fn default_cache_dir() -> PathBuf {
    home_dir().join(".simcloud").join("cache")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_initial_interval_ms() -> u64 {
    1_000
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_growth_factor() -> f64 {
    1.5
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            growth_factor: default_growth_factor(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            token: None,
            token_file: default_token_file(),
            cache_dir: default_cache_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetrySection::default(),
            poll: PollSection::default(),
        }
    }
}

impl SimConfig {
    /// Loads `simcloud.toml` from the current directory, or the file named by
    /// `SIMCLOUD_CONFIG`. Uses defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("SIMCLOUD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Loads the given file, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<SimConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    // Environment variables take precedence over the file.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SIMCLOUD_API_URL")
            && !url.is_empty()
        {
            self.api_url = url;
        }
        if let Ok(key) = std::env::var("SIMCLOUD_API_KEY")
            && !key.is_empty()
        {
            self.api_key = key;
        }
        if let Ok(token) = std::env::var("SIMCLOUD_TOKEN")
            && !token.is_empty()
        {
            self.token = Some(token);
        }
        if let Some(dir) = std::env::var_os("SIMCLOUD_CACHE_DIR")
            && !dir.is_empty()
        {
            self.cache_dir = PathBuf::from(dir);
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter.clamp(0.0, 1.0),
            ..RetryPolicy::default()
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.poll.initial_interval_ms),
            max_interval: Duration::from_millis(self.poll.max_interval_ms),
            growth_factor: self.poll.growth_factor.max(1.0),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
