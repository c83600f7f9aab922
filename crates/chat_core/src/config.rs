use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::config_json_path;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub http_proxy_auth: Option<ProxyAuth>,
    #[serde(default)]
    pub https_proxy_auth: Option<ProxyAuth>,
    pub api_base: Option<String>,
    /// Bearer credential of the signed-in user.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_resume_timeout_secs")]
    pub resume_timeout_secs: u64,
    /// Retries applied by the HTTP middleware to history-store queries.
    #[serde(default = "default_query_max_retries")]
    pub query_max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Streaming request retry budget. Delay before retry n is
/// `base_delay_ms * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
        }
    }
}

const CONFIG_FILE_PATH: &str = "config.toml";
const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

fn default_resume_timeout_secs() -> u64 {
    120
}

fn default_query_max_retries() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_proxy: String::new(),
            https_proxy: String::new(),
            http_proxy_auth: None,
            https_proxy_auth: None,
            api_base: None,
            access_token: None,
            retry: RetrySettings::default(),
            resume_timeout_secs: default_resume_timeout_secs(),
            query_max_retries: default_query_max_retries(),
        }
    }
}

impl Config {
    /// Load from `~/.planner/config.json`, falling back to `./config.toml`,
    /// then apply environment overrides.
    pub fn new() -> Self {
        let mut config = Self::from_files(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Read the first config file that exists and parses. Unreadable files are
    /// logged and skipped.
    pub fn from_files(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match Self::read_json(json_path) {
                Ok(config) => return config,
                Err(err) => log::warn!("Ignoring {}: {}", json_path.display(), err),
            }
        }

        if toml_path.exists() {
            match Self::read_toml(toml_path) {
                Ok(config) => return config,
                Err(err) => log::warn!("Ignoring {}: {}", toml_path.display(), err),
            }
        }

        Self::default()
    }

    fn read_json(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn read_toml(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from environment variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(http_proxy) = lookup("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = lookup("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(api_base) = lookup("PLANNER_API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(token) = lookup("PLANNER_ACCESS_TOKEN") {
            self.access_token = Some(token).filter(|t| !t.trim().is_empty());
        }
        if let Some(attempts) = lookup("PLANNER_MAX_ATTEMPTS") {
            match attempts.trim().parse::<u32>() {
                Ok(value) if value > 0 => self.retry.max_attempts = value,
                _ => log::warn!("Ignoring invalid PLANNER_MAX_ATTEMPTS: {attempts:?}"),
            }
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }
}
