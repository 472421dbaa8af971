//! Revision statistics

use crate::processor::{ProcessingError, RevisionProcessor};
use crate::types::{Revision, SiteInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Counters over every revision a processor has seen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionStatistics {
    pub passes: u64,
    pub revisions: u64,
    pub anonymous_revisions: u64,
    /// Bytes of revision text
    pub text_bytes: u64,
    pub by_content_model: BTreeMap<String, u64>,
    pub by_namespace: BTreeMap<i32, u64>,
    /// Highest revision id seen
    pub max_revision_id: u64,
    #[serde(skip)]
    pass_revisions: u64,
    #[serde(skip)]
    site_name: String,
}

impl RevisionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revisions of one content model
    pub fn count_for_model(&self, model: &str) -> u64 {
        self.by_content_model.get(model).copied().unwrap_or(0)
    }
}

impl RevisionProcessor for RevisionStatistics {
    fn start_pass(&mut self, site: &SiteInfo) -> Result<(), ProcessingError> {
        self.pass_revisions = 0;
        self.site_name.clone_from(&site.site_name);
        Ok(())
    }

    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        self.revisions += 1;
        self.pass_revisions += 1;
        if revision.contributor.is_anonymous() {
            self.anonymous_revisions += 1;
        }
        self.text_bytes += revision.text.len() as u64;
        *self
            .by_content_model
            .entry(revision.content_model.clone())
            .or_default() += 1;
        *self.by_namespace.entry(revision.namespace).or_default() += 1;
        self.max_revision_id = self.max_revision_id.max(revision.revision_id);
        Ok(())
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        self.passes += 1;
        info!(
            site = %self.site_name,
            pass_revisions = self.pass_revisions,
            total_revisions = self.revisions,
            "Pass statistics"
        );
        Ok(())
    }
}
