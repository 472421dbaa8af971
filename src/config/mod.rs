//! Configuration for dumpsync

mod dumps;
mod logging;
mod processing;

pub use dumps::{DedupConfig, DumpsConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use processing::{FilterConfig, ProcessingConfig};

use crate::broker::DedupCapacity;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default user agent for all HTTP requests
pub const DEFAULT_USER_AGENT: &str = "dumpsync/0.1 (wiki dump ingestion)";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dump sources and local cache
    #[serde(default)]
    pub dumps: DumpsConfig,
    /// Deduplication capacity hints
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Document field filter
    #[serde(default)]
    pub filter: FilterConfig,
    /// Run control
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Dump source validation
        if self.dumps.project.trim().is_empty() {
            errors.push("dumps.project must not be empty".to_string());
        }
        if !self.dumps.offline {
            match url::Url::parse(&self.dumps.base_url) {
                Ok(url) if !url.path().ends_with('/') => {
                    errors.push("dumps.base_url must end with '/'".to_string());
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("dumps.base_url is not a valid URL: {}", e)),
            }
        }
        if self.dumps.download_root.as_os_str().is_empty() {
            errors.push("dumps.download_root must not be empty".to_string());
        }
        if self.dumps.request_timeout_secs == Some(0) {
            errors.push("dumps.request_timeout_secs must be positive when set".to_string());
        }

        // Dedup capacity validation
        if let Err(e) = DedupCapacity::new(self.dedup.page_capacity, self.dedup.revision_capacity) {
            errors.push(e.to_string());
        }

        // Processing validation
        if self.processing.timeout_secs == Some(0) {
            errors.push("processing.timeout_secs must be positive when set".to_string());
        }
        if self.processing.progress_interval == 0 {
            errors.push("processing.progress_interval must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
