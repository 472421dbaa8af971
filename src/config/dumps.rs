//! Dump source and deduplication configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::DEFAULT_USER_AGENT;

/// Where dumps come from and where they are cached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpsConfig {
    /// Project (database) name, e.g. "wikidatawiki"
    pub project: String,
    /// Base URL of the dump server
    pub base_url: String,
    /// Root of the local cache (`{download_root}/dumpfiles/...`)
    pub download_root: PathBuf,
    /// Only use dumps that are already cached
    pub offline: bool,
    /// User agent for all HTTP requests
    pub user_agent: String,
    /// Whole-request timeout in seconds (unset: no timeout)
    pub request_timeout_secs: Option<u64>,
}

impl Default for DumpsConfig {
    fn default() -> Self {
        Self {
            project: "wikidatawiki".to_string(),
            base_url: "https://dumps.wikimedia.org/".to_string(),
            download_root: PathBuf::from(".dumpsync"),
            offline: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: None,
        }
    }
}

/// Capacity hints of the broker's seen-page and seen-revision sets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Expected upper bound of page ids
    pub page_capacity: u64,
    /// Expected upper bound of revision ids
    pub revision_capacity: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            page_capacity: 20_000_000,
            revision_capacity: 200_000_000,
        }
    }
}
