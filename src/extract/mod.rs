//! Extraction of records from dump payloads
//!
//! - [`RevisionExtractor`]: XML revision exports (incremental, current, full)
//! - [`JsonDumpReader`]: JSON entity snapshots, one entity per line
//! - [`SitesTableParser`]: SQL dump of the `sites` table

pub mod json;
pub mod sites;
pub mod wikimedia;

pub use json::{JsonDumpReader, JsonDumpStats};
pub use sites::{Site, SitesTableParser};
pub use wikimedia::RevisionExtractor;

use crate::dumps::{DumpError, DumpFile};
use crate::processor::{ProcessingError, RevisionProcessor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during extraction
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("XML error: {0}")]
    Xml(quick_xml::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Unexpected end of input inside <{0}>")]
    UnexpectedEof(&'static str),

    #[error("Processor error: {0}")]
    Processor(ProcessingError),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Dump error: {0}")]
    Dump(#[from] DumpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Whether the error can be contained to a single page or record
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExtractError::Xml(_) | ExtractError::Format(_) | ExtractError::Processor(_)
        )
    }
}

impl From<ProcessingError> for ExtractError {
    fn from(e: ProcessingError) -> Self {
        match e {
            ProcessingError::Aborted(reason) => ExtractError::Aborted(reason),
            other => ExtractError::Processor(other),
        }
    }
}

/// Counters of one extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractStats {
    /// `<page>` elements encountered
    pub pages: u64,
    /// Revisions delivered to the processor
    pub revisions: u64,
    /// Pages skipped because of errors
    pub pages_with_errors: u64,
}

impl ExtractStats {
    pub fn add(&mut self, other: &ExtractStats) {
        self.pages += other.pages;
        self.revisions += other.revisions;
        self.pages_with_errors += other.pages_with_errors;
    }
}

/// Open a revision dump and run the extractor over it
pub fn extract_revisions(
    dump: &dyn DumpFile,
    processor: &mut dyn RevisionProcessor,
) -> Result<ExtractStats, ExtractError> {
    let reader = dump.open()?;
    RevisionExtractor::new(reader, dump.descriptor().to_string()).run(processor)
}
