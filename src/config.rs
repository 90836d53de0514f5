use crate::constants::*;
use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fetch: FetchConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// One page to scrape: the season it covers and where it lives.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Target {
    pub season: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Outcome of the manual robots.txt / ToS review. Nothing is fetched unless true.
    #[serde(default)]
    pub allowed: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
    /// Path prefixes ruled out by the robots.txt review.
    #[serde(default)]
    pub disallowed_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Optional CSS selector narrowing which tables are considered.
    #[serde(default)]
    pub table_selector: Option<String>,
    #[serde(default = "default_team_headers")]
    pub team_headers: Vec<String>,
    #[serde(default = "default_season_headers")]
    pub season_headers: Vec<String>,
    #[serde(default = "default_points_allowed_headers")]
    pub points_allowed_headers: Vec<String>,
    #[serde(default = "default_sacks_headers")]
    pub sacks_headers: Vec<String>,
    #[serde(default = "default_interceptions_headers")]
    pub interceptions_headers: Vec<String>,
    #[serde(default = "default_skip_row_labels")]
    pub skip_row_labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_min_multiplier")]
    pub min_multiplier: f64,
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_crawl_delay_ms() -> u64 {
    DEFAULT_CRAWL_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_max_retry_after_secs() -> u64 {
    DEFAULT_MAX_RETRY_AFTER_SECS
}
fn default_min_multiplier() -> f64 {
    DEFAULT_MIN_MULTIPLIER
}
fn default_max_multiplier() -> f64 {
    DEFAULT_MAX_MULTIPLIER
}
fn default_output_dir() -> String {
    DEFAULT_OUTPUT_DIR.to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allowed: false,
            user_agent: default_user_agent(),
            crawl_delay_ms: DEFAULT_CRAWL_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retry_after_secs: DEFAULT_MAX_RETRY_AFTER_SECS,
            disallowed_paths: Vec::new(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            table_selector: None,
            team_headers: default_team_headers(),
            season_headers: default_season_headers(),
            points_allowed_headers: default_points_allowed_headers(),
            sacks_headers: default_sacks_headers(),
            interceptions_headers: default_interceptions_headers(),
            skip_row_labels: default_skip_row_labels(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            min_multiplier: DEFAULT_MIN_MULTIPLIER,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl FetchConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CRAWL_DELAY_MS..=MAX_CRAWL_DELAY_MS).contains(&self.crawl_delay_ms) {
            return Err(ScraperError::Config(format!(
                "fetch.crawl_delay_ms must be between {} and {}, got {}",
                MIN_CRAWL_DELAY_MS, MAX_CRAWL_DELAY_MS, self.crawl_delay_ms
            )));
        }
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CAP {
            return Err(ScraperError::Config(format!(
                "fetch.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_CAP, self.max_attempts
            )));
        }
        if self.backoff_base_ms == 0 {
            return Err(ScraperError::Config("fetch.backoff_base_ms must be positive".into()));
        }
        if !(self.backoff_multiplier > 1.0) {
            return Err(ScraperError::Config(format!(
                "fetch.backoff_multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ScraperError::Config("fetch.timeout_secs must be positive".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ScraperError::Config("fetch.user_agent must describe the scraper".into()));
        }
        Ok(())
    }
}

impl TransformConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_multiplier > 0.0) || !(self.max_multiplier > self.min_multiplier) {
            return Err(ScraperError::Config(format!(
                "transform bounds must satisfy 0 < min < max, got [{}, {}]",
                self.min_multiplier, self.max_multiplier
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fetch.validate()?;
        self.transform.validate()?;
        for target in &self.targets {
            reqwest::Url::parse(&target.url).map_err(|e| ScraperError::InvalidUrl {
                url: target.url.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
