use crate::constants::{
    DEFAULT_DATABASE_PATH, DEFAULT_USER_AGENT, ENV_DATABASE_PATH, ENV_USER_AGENT,
};
use crate::crawler::StopCondition;
use crate::error::{CrawlerError, Result};
use crate::pipeline::PipelineConfig;
use crate::rate_limiter::Limits;
use crate::retry::RetryPolicy;
use crate::types::PlayerIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed_identity: Option<String>,
    pub max_iterations: Option<u64>,
    pub max_duration_secs: Option<u64>,
    pub fetch_concurrency_limit: usize,
    pub required_fetchers: Vec<String>,
    pub max_selection_attempts: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed_identity: None,
            max_iterations: Some(10),
            max_duration_secs: None,
            fetch_concurrency_limit: 4,
            required_fetchers: vec!["profile".to_string()],
            max_selection_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub requests_per_min: Option<u64>,
    pub max_in_flight: Option<u32>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_min: Some(120),
            max_in_flight: Some(4),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CrawlerError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` if it exists, defaults otherwise; then applies
    /// environment overrides and validates.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            info!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var(ENV_DATABASE_PATH) {
            self.storage.database_path = PathBuf::from(db);
        }
        if let Ok(agent) = std::env::var(ENV_USER_AGENT) {
            self.http.user_agent = agent;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.fetch_concurrency_limit == 0 {
            return Err(CrawlerError::Config("run.fetch_concurrency_limit must be at least 1".into()));
        }
        if self.run.max_selection_attempts == 0 {
            return Err(CrawlerError::Config("run.max_selection_attempts must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CrawlerError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.timeout_secs == 0 {
            return Err(CrawlerError::Config("retry.timeout_secs must be at least 1".into()));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(CrawlerError::Config("http.user_agent is empty".into()));
        }
        self.pipeline.validate(&self.run.required_fetchers)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            timeout: Duration::from_secs(self.retry.timeout_secs),
        }
    }

    pub fn stop_condition(&self) -> StopCondition {
        StopCondition {
            max_iterations: self.run.max_iterations,
            max_duration: self.run.max_duration_secs.map(Duration::from_secs),
        }
    }

    pub fn rate_limits(&self) -> Limits {
        Limits {
            requests_per_min: self.http.requests_per_min,
            max_in_flight: self.http.max_in_flight,
        }
    }

    pub fn seed(&self) -> Result<Option<PlayerIdentity>> {
        self.run
            .seed_identity
            .as_deref()
            .map(PlayerIdentity::new)
            .transpose()
    }
}
