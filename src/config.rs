//! Run configuration file
//!
//! ```yaml
//! concurrent: 20          # worker limit, clamped to the candidate count
//! timeout: 5000           # per-request timeout through a candidate, ms
//! print-progress: true
//! fetch-retries: 30
//! mmdb-path: ./Country.mmdb
//! sub-urls:
//!   - https://example.com/sub.yaml
//! ```

use crate::proxy::checker::CheckerConfig;
use crate::proxy::subscription::FetcherConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

fn default_concurrent() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_fetch_retries() -> u32 {
    30
}

/// Settings for one check run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,
    /// Milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub print_progress: bool,
    #[serde(default)]
    pub sub_urls: Vec<String>,
    #[serde(default)]
    pub mmdb_path: Option<String>,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrent: default_concurrent(),
            timeout: default_timeout_ms(),
            print_progress: true,
            sub_urls: Vec::new(),
            mmdb_path: None,
            fetch_retries: default_fetch_retries(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        if let Some(url) = self.sub_urls.iter().find(|u| u.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("empty subscription url {:?}", url)));
        }
        Ok(())
    }

    pub fn checker_config(&self) -> CheckerConfig {
        let config = CheckerConfig::new()
            .with_concurrency(self.concurrent)
            .with_timeout(Duration::from_millis(self.timeout))
            .with_progress(self.print_progress);

        match &self.mmdb_path {
            Some(path) => config.with_mmdb_path(path.clone()),
            None => config,
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig::new().with_max_attempts(self.fetch_retries)
    }
}
