//! Reader for JSON entity snapshots
//!
//! Snapshots are one large JSON array with exactly one entity per line:
//!
//! ```text
//! [
//! {"type":"item","id":"Q1",...},
//! {"type":"item","id":"Q2",...}
//! ]
//! ```
//!
//! Lines are decoded independently, so a broken record only loses itself.

use super::ExtractError;
use crate::documents::{DecodeError, EntityDocument};
use crate::processor::EntityDocumentProcessor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use tracing::{debug, warn};

/// Counters of one snapshot pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonDumpStats {
    /// Documents delivered
    pub documents: u64,
    /// Records that could not be decoded
    pub decode_errors: u64,
    /// Documents the processor rejected
    pub processor_errors: u64,
}

/// Streaming reader over a JSON snapshot
pub struct JsonDumpReader<R> {
    reader: R,
    source_name: String,
}

impl<R: BufRead> JsonDumpReader<R> {
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            source_name: source_name.into(),
        }
    }

    /// Decode every record and hand it to `processor`
    pub fn run(mut self, processor: &mut dyn EntityDocumentProcessor) -> Result<JsonDumpStats, ExtractError> {
        let mut stats = JsonDumpStats::default();
        let mut line = Vec::new();
        let mut line_number = 0u64;

        loop {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            line_number += 1;

            let record = trim_record(&line);
            if record.is_empty() || record == b"[" || record == b"]" {
                continue;
            }

            let document = match serde_json::from_slice::<Value>(record)
                .map_err(DecodeError::from)
                .and_then(EntityDocument::from_value)
            {
                Ok(document) => document,
                Err(e) => {
                    stats.decode_errors += 1;
                    warn!(
                        source = %self.source_name,
                        line = line_number,
                        error = %e,
                        "Skipping undecodable record"
                    );
                    continue;
                }
            };

            match processor.process_document(&document) {
                Ok(()) => stats.documents += 1,
                Err(e) if e.is_abort() => return Err(e.into()),
                Err(e) => {
                    stats.processor_errors += 1;
                    warn!(
                        source = %self.source_name,
                        entity = %document.id,
                        error = %e,
                        "Document processor failed"
                    );
                }
            }
        }

        match processor.finish() {
            Ok(()) => {}
            Err(e) if e.is_abort() => return Err(e.into()),
            Err(e) => {
                stats.processor_errors += 1;
                warn!(source = %self.source_name, error = %e, "Document processor failed to finish");
            }
        }
        debug!(
            source = %self.source_name,
            documents = stats.documents,
            errors = stats.decode_errors,
            "Snapshot read"
        );
        Ok(stats)
    }
}

/// Strip surrounding whitespace and the array separator of one line
fn trim_record(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    let record = &line[start..end];
    record.strip_suffix(b",").unwrap_or(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessingError;

    #[derive(Default)]
    struct Collect {
        ids: Vec<String>,
        finished: bool,
    }

    impl EntityDocumentProcessor for Collect {
        fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
            if document.id == "Q666" {
                return Err(ProcessingError::Failed("rejected".to_string()));
            }
            self.ids.push(document.id.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), ProcessingError> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_reads_one_record_per_line() {
        let dump = "[\n{\"type\":\"item\",\"id\":\"Q1\",\"lastrevid\":5},\n{\"type\":\"property\",\"id\":\"P31\"}\n]\n";
        let mut collect = Collect::default();
        let stats = JsonDumpReader::new(dump.as_bytes(), "json").run(&mut collect).unwrap();

        assert_eq!(collect.ids, vec!["Q1", "P31"]);
        assert!(collect.finished);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.decode_errors, 0);
    }

    #[test]
    fn test_bad_records_are_counted_and_skipped() {
        let dump = "[\n{\"type\":\"item\",\"id\":\"Q1\"},\n{\"type\":\"item\",\"id\":\n{\"id\":\"Q3\"},\n{\"type\":\"item\",\"id\":\"Q666\"},\n{\"type\":\"item\",\"id\":\"Q4\"}\n]\n";
        let mut collect = Collect::default();
        let stats = JsonDumpReader::new(dump.as_bytes(), "json").run(&mut collect).unwrap();

        assert_eq!(collect.ids, vec!["Q1", "Q4"]);
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.processor_errors, 1);
    }

    #[test]
    fn test_abort_stops_reading() {
        struct Abort(u32);
        impl EntityDocumentProcessor for Abort {
            fn process_document(&mut self, _: &EntityDocument) -> Result<(), ProcessingError> {
                self.0 += 1;
                Err(ProcessingError::Aborted("stop".to_string()))
            }
        }

        let dump = "[\n{\"type\":\"item\",\"id\":\"Q1\"},\n{\"type\":\"item\",\"id\":\"Q2\"}\n]\n";
        let mut abort = Abort(0);
        let err = JsonDumpReader::new(dump.as_bytes(), "json").run(&mut abort).unwrap_err();
        assert!(matches!(err, ExtractError::Aborted(_)));
        assert_eq!(abort.0, 1);
    }

    #[test]
    fn test_invalid_utf8_record_is_skipped() {
        let mut dump = b"[\n{\"type\":\"item\",\"id\":\"Q1\"},\n".to_vec();
        dump.extend_from_slice(b"{\"type\":\"item\",\"id\":\"Q\xff\"},\n");
        dump.extend_from_slice(b"{\"type\":\"item\",\"id\":\"Q3\"}\n]\n");
        let mut collect = Collect::default();
        let stats = JsonDumpReader::new(&dump[..], "json").run(&mut collect).unwrap();

        assert_eq!(collect.ids, vec!["Q1", "Q3"]);
        assert_eq!(stats.decode_errors, 1);
        assert!(collect.finished);
    }

    #[test]
    fn test_failing_finish_does_not_fail_snapshot() {
        struct FailingFinish(u32);
        impl EntityDocumentProcessor for FailingFinish {
            fn process_document(&mut self, _: &EntityDocument) -> Result<(), ProcessingError> {
                self.0 += 1;
                Ok(())
            }

            fn finish(&mut self) -> Result<(), ProcessingError> {
                Err(ProcessingError::Failed("flush failed".to_string()))
            }
        }

        let dump = "[\n{\"type\":\"item\",\"id\":\"Q1\"}\n]\n";
        let mut processor = FailingFinish(0);
        let stats = JsonDumpReader::new(dump.as_bytes(), "json").run(&mut processor).unwrap();
        assert_eq!(processor.0, 1);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.processor_errors, 1);
    }
}
