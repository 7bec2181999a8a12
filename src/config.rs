use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::is_remote;

/// WienMobil station status endpoint (GBFS `station_status.json`).
pub const DEFAULT_SOURCE: &str =
    "https://api.wstw.at/gateway/WL_WIENMOBIL_API/1/station_status.json";
pub const DEFAULT_OUTPUT_DIR: &str = ".";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: source must not be empty")]
    EmptySource,
    #[error("invalid configuration: {url} is not a valid url: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid configuration: timeout must be greater than zero")]
    ZeroTimeout,
}

/// Settings for one snapshot run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiverConfig {
    /// URL to fetch, or a path to a raw document on disk.
    pub source: String,
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

impl ArchiverConfig {
    pub fn new(
        source: &str,
        output_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ConfigError::EmptySource);
        }
        if is_remote(source) {
            reqwest::Url::parse(source).map_err(|e| ConfigError::InvalidUrl {
                url: source.to_string(),
                reason: e.to_string(),
            })?;
        }
        if timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(Self {
            source: source.to_string(),
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn is_remote(&self) -> bool {
        is_remote(&self.source)
    }
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}
