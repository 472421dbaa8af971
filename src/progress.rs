//! Progress tracking and run summaries

use crate::broker::BrokerStats;
use crate::documents::EntityDocument;
use crate::extract::ExtractStats;
use crate::processor::{EntityDocumentProcessor, ProcessingError, RevisionProcessor};
use crate::types::Revision;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A dump that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFailure {
    pub dump: String,
    pub error: String,
}

/// Outcome of one controller run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Dumps processed to the end, in processing order
    pub dumps_processed: Vec<String>,
    /// Dumps that failed, with the reason
    pub dumps_failed: Vec<DumpFailure>,
    pub extract: ExtractStats,
    pub broker: BrokerStats,
    /// Documents read from JSON snapshots
    pub documents: u64,
    /// Records of JSON snapshots that could not be decoded
    pub document_errors: u64,
    /// Sites read from sites tables
    pub sites: u64,
    pub elapsed_seconds: f64,
    /// Reason of a cooperative cancellation
    pub aborted: Option<String>,
}

impl RunSummary {
    /// Whether every selected dump was processed without being cancelled
    pub fn is_complete(&self) -> bool {
        self.dumps_failed.is_empty() && self.aborted.is_none()
    }

    pub fn record_failure(&mut self, dump: impl Into<String>, error: impl ToString) {
        self.dumps_failed.push(DumpFailure {
            dump: dump.into(),
            error: error.to_string(),
        });
    }

    /// Print summary to console
    pub fn print(&self) {
        println!("\nRun Summary");
        println!("===========");
        println!("Dumps processed:      {}", self.dumps_processed.len());
        for dump in &self.dumps_processed {
            println!("  {}", dump);
        }
        if !self.dumps_failed.is_empty() {
            println!("Dumps failed:         {}", self.dumps_failed.len());
            for failure in &self.dumps_failed {
                println!("  {}: {}", failure.dump, failure.error);
            }
        }
        if self.extract.pages > 0 {
            println!("Pages:                {}", self.extract.pages);
            println!("Pages with errors:    {}", self.extract.pages_with_errors);
            println!("Revisions received:   {}", self.broker.revisions_received);
            println!("Duplicates discarded: {}", self.broker.duplicates_discarded);
            println!("Current revisions:    {}", self.broker.current_emitted);
        }
        if self.documents > 0 || self.document_errors > 0 {
            println!("Documents:            {}", self.documents);
            println!("Undecodable records:  {}", self.document_errors);
        }
        if self.sites > 0 {
            println!("Sites:                {}", self.sites);
        }
        println!("Elapsed time:         {:.1}s", self.elapsed_seconds);
        if let Some(reason) = &self.aborted {
            println!("Aborted:              {}", reason);
        }
    }
}

/// Spinner over the records of a run
pub struct RunProgress {
    /// Spinner (None in quiet mode)
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
    records: AtomicU64,
    interval: u64,
}

impl RunProgress {
    pub fn new(quiet: bool, interval: u64) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(200));
            Some(pb)
        };

        Self {
            progress_bar,
            start_time: Instant::now(),
            records: AtomicU64::new(0),
            interval: interval.max(1),
        }
    }

    /// Show which dump is being read
    pub fn dump_started(&self, dump: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_message(dump.to_string());
        }
    }

    /// Count one record; the display is refreshed every `interval` records
    pub fn record(&self) {
        let count = self.records.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.interval != 0 {
            return;
        }
        if let Some(ref pb) = self.progress_bar {
            pb.set_position(count);
        }
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Stop the spinner
    pub fn finish(&self, summary: &RunSummary) {
        if let Some(ref pb) = self.progress_bar {
            let message = match &summary.aborted {
                Some(reason) => format!("Aborted: {}", reason),
                None => format!(
                    "Done! {} dumps, {} failed",
                    summary.dumps_processed.len(),
                    summary.dumps_failed.len()
                ),
            };
            pb.set_position(self.records());
            pb.finish_with_message(message);
        }
    }
}

/// Consumer that only advances a [`RunProgress`]
pub struct ProgressTicker<'p> {
    progress: &'p RunProgress,
}

impl<'p> ProgressTicker<'p> {
    pub fn new(progress: &'p RunProgress) -> Self {
        Self { progress }
    }
}

impl RevisionProcessor for ProgressTicker<'_> {
    fn process_revision(&mut self, _revision: &Revision) -> Result<(), ProcessingError> {
        self.progress.record();
        Ok(())
    }
}

impl EntityDocumentProcessor for ProgressTicker<'_> {
    fn process_document(&mut self, _document: &EntityDocument) -> Result<(), ProcessingError> {
        self.progress.record();
        Ok(())
    }
}
