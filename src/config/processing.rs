//! Document filtering and run control configuration

use serde::{Deserialize, Serialize};

/// Field-level allow-lists applied to decoded entity documents
///
/// A list that is unset keeps every value of that kind; an empty list removes
/// all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Language codes of labels, descriptions and aliases to keep
    pub languages: Option<Vec<String>>,
    /// Site keys of sitelinks to keep
    pub sites: Option<Vec<String>>,
    /// Property ids of statements to keep
    pub properties: Option<Vec<String>>,
}

impl FilterConfig {
    /// Whether any allow-list is configured
    pub fn is_active(&self) -> bool {
        self.languages.is_some() || self.sites.is_some() || self.properties.is_some()
    }
}

/// Run control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Abort a run after this many seconds
    pub timeout_secs: Option<u64>,
    /// Suppress the progress spinner
    pub quiet: bool,
    /// Update the progress display every N revisions
    pub progress_interval: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            quiet: false,
            progress_interval: 1000,
        }
    }
}
