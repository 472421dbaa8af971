//! JSON lines output

use crate::documents::EntityDocument;
use crate::extract::Site;
use crate::processor::{EntityDocumentProcessor, ProcessingError, RevisionProcessor, SitesProcessor};
use crate::types::Revision;
use serde::Serialize;
use std::io::{BufWriter, Write};

/// Writes every record it receives as one JSON object per line
pub struct JsonLinesWriter<W: Write> {
    out: BufWriter<W>,
    written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            written: 0,
        }
    }

    /// Number of lines written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_record<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<(), ProcessingError> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ProcessingError> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> Result<W, ProcessingError> {
        self.out
            .into_inner()
            .map_err(|e| ProcessingError::Io(e.into_error()))
    }
}

impl<W: Write> RevisionProcessor for JsonLinesWriter<W> {
    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        self.write_record(revision)
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        self.flush()
    }
}

impl<W: Write> EntityDocumentProcessor for JsonLinesWriter<W> {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
        self.write_record(&document.data)
    }

    fn finish(&mut self) -> Result<(), ProcessingError> {
        self.flush()
    }
}

impl<W: Write> SitesProcessor for JsonLinesWriter<W> {
    fn process_site(&mut self, site: &Site) -> Result<(), ProcessingError> {
        self.write_record(site)
    }
}
