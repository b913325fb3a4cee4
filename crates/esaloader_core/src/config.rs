use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::http::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://api.esa.io";
pub const DEFAULT_USER_AGENT: &str = concat!("esaloader/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CONFIG_FILENAME: &str = ".esaloader.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "./esa_posts";
pub const ACCESS_TOKEN_ENV: &str = "ESA_ACCESS_TOKEN";
pub const MAX_PER_PAGE: u32 = 100;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PAGE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EsaConfig {
    #[serde(default)]
    pub esa: EsaSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EsaSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub per_page: Option<u32>,
    pub page_delay_ms: Option<u64>,
    pub max_attempts: Option<usize>,
    pub initial_backoff_ms: Option<u64>,
    pub rate_limit_default_wait_ms: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

impl EsaConfig {
    /// Resolve the API base URL: env ESA_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_string("ESA_API_URL")
            .or_else(|| self.esa.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Resolve user agent: env ESA_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_string("ESA_USER_AGENT")
            .or_else(|| self.esa.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            env_u64("ESA_HTTP_TIMEOUT_MS")
                .or(self.esa.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(
            env_u64("ESA_PAGE_DELAY_MS")
                .or(self.esa.page_delay_ms)
                .unwrap_or(DEFAULT_PAGE_DELAY_MS),
        )
    }

    /// Page size sent to the search endpoint, clamped to the API maximum.
    pub fn per_page(&self) -> u32 {
        self.esa
            .per_page
            .unwrap_or(MAX_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.esa
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .esa
                .max_attempts
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1),
            initial_backoff: Duration::from_millis(
                self.esa
                    .initial_backoff_ms
                    .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            ),
            default_rate_limit_wait: Duration::from_millis(
                self.esa
                    .rate_limit_default_wait_ms
                    .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS),
            ),
        }
    }
}

/// Load and parse an EsaConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<EsaConfig> {
    if !config_path.exists() {
        return Ok(EsaConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: EsaConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Read the personal access token. No request is made without one.
pub fn access_token_from_env() -> Result<String> {
    match env_string(ACCESS_TOKEN_ENV) {
        Some(token) => Ok(token),
        None => bail!(
            "{ACCESS_TOKEN_ENV} environment variable not set\nPlease set it with your esa.io personal access token"
        ),
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}
