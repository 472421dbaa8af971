//! Deadline-based cancellation

use crate::documents::EntityDocument;
use crate::processor::{EntityDocumentProcessor, ProcessingError, RevisionProcessor};
use crate::types::Revision;
use std::time::{Duration, Instant};
use tracing::info;

/// Aborts the run once a deadline has passed
///
/// Registered like any other consumer; it inspects nothing and only checks the
/// clock on every callback.
#[derive(Debug, Clone)]
pub struct TimeoutProcessor {
    timeout: Duration,
    deadline: Instant,
    reported: bool,
}

impl TimeoutProcessor {
    /// Start the clock now
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
            reported: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn check(&mut self) -> Result<(), ProcessingError> {
        if !self.is_expired() {
            return Ok(());
        }
        if !self.reported {
            self.reported = true;
            info!(timeout_secs = self.timeout.as_secs(), "Timeout reached, stopping");
        }
        Err(ProcessingError::Aborted(format!(
            "timeout of {}s reached",
            self.timeout.as_secs()
        )))
    }
}

impl RevisionProcessor for TimeoutProcessor {
    fn process_revision(&mut self, _revision: &Revision) -> Result<(), ProcessingError> {
        self.check()
    }
}

impl EntityDocumentProcessor for TimeoutProcessor {
    fn process_document(&mut self, _document: &EntityDocument) -> Result<(), ProcessingError> {
        self.check()
    }
}
