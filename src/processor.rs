//! Consumer interfaces of the processing pipeline
//!
//! Three kinds of consumers can be attached to a run:
//! - [`RevisionProcessor`]: raw revisions from XML dumps
//! - [`EntityDocumentProcessor`]: decoded entity documents (from revision text or
//!   from a JSON snapshot)
//! - [`SitesProcessor`]: rows of the sites table
//!
//! Callbacks are invoked inline on the processing thread. A consumer that wants to
//! stop the run returns [`ProcessingError::Aborted`]; any other error is logged by
//! the caller and processing continues.

use crate::documents::EntityDocument;
use crate::extract::Site;
use crate::types::{Revision, SiteInfo};
use thiserror::Error;

/// Errors raised by consumers
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Cooperative cancellation: terminates the current dump and the run
    #[error("processing aborted: {0}")]
    Aborted(String),

    #[error("processor failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcessingError {
    /// Whether this error requests cancellation of the run
    pub fn is_abort(&self) -> bool {
        matches!(self, ProcessingError::Aborted(_))
    }
}

/// Consumer of revisions extracted from XML dumps
///
/// For every dump pass, `start_pass` is called once before the first revision and
/// `finish_pass` once after the last. The `&Revision` handed to
/// `process_revision` is only valid for that call.
pub trait RevisionProcessor {
    fn start_pass(&mut self, _site: &SiteInfo) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError>;

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        Ok(())
    }
}

impl<P: RevisionProcessor + ?Sized> RevisionProcessor for &mut P {
    fn start_pass(&mut self, site: &SiteInfo) -> Result<(), ProcessingError> {
        (**self).start_pass(site)
    }

    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        (**self).process_revision(revision)
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        (**self).finish_pass()
    }
}

impl<P: RevisionProcessor + ?Sized> RevisionProcessor for Box<P> {
    fn start_pass(&mut self, site: &SiteInfo) -> Result<(), ProcessingError> {
        (**self).start_pass(site)
    }

    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        (**self).process_revision(revision)
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        (**self).finish_pass()
    }
}

/// Consumer of decoded entity documents
pub trait EntityDocumentProcessor {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError>;

    /// Called once after each dump that fed documents to this processor
    fn finish(&mut self) -> Result<(), ProcessingError> {
        Ok(())
    }
}

impl<P: EntityDocumentProcessor + ?Sized> EntityDocumentProcessor for &mut P {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
        (**self).process_document(document)
    }

    fn finish(&mut self) -> Result<(), ProcessingError> {
        (**self).finish()
    }
}

impl<P: EntityDocumentProcessor + ?Sized> EntityDocumentProcessor for Box<P> {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
        (**self).process_document(document)
    }

    fn finish(&mut self) -> Result<(), ProcessingError> {
        (**self).finish()
    }
}

/// Consumer of sites table rows
pub trait SitesProcessor {
    fn process_site(&mut self, site: &Site) -> Result<(), ProcessingError>;
}

impl<P: SitesProcessor + ?Sized> SitesProcessor for &mut P {
    fn process_site(&mut self, site: &Site) -> Result<(), ProcessingError> {
        (**self).process_site(site)
    }
}

impl<P: SitesProcessor + ?Sized> SitesProcessor for Box<P> {
    fn process_site(&mut self, site: &Site) -> Result<(), ProcessingError> {
        (**self).process_site(site)
    }
}
