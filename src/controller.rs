//! Processing controller
//!
//! Entry point for running consumers over the dumps of a project. Consumers are
//! registered once; every `process_*` call then builds a fresh broker, picks the
//! dumps to read and reports a [`RunSummary`].
//!
//! ```text
//! DumpCatalog ──► dump (newest first) ──► RevisionExtractor ──► RevisionBroker
//!                                                                 │
//!                       ┌─────────────────────────────────────────┤
//!                       ▼                                         ▼
//!             revision processors            DocumentRevisionAdapter ──► document processors
//! ```
//!
//! JSON snapshots skip the extractor and the broker: their documents go straight
//! to the document processors. Sites tables go to the sites processors.

use crate::broker::{BrokerError, DedupCapacity, RevisionBroker};
use crate::config::Config;
use crate::documents::{
    DocumentDecoder, DocumentFilter, DocumentRevisionAdapter, EntityDocument, FilteredDocuments,
    JsonDocumentDecoder,
};
use crate::dumps::{DumpCatalog, DumpContentType, DumpError, DumpFile};
use crate::extract::{extract_revisions, ExtractError, JsonDumpReader, Site, SitesTableParser};
use crate::processor::{
    EntityDocumentProcessor, ProcessingError, RevisionProcessor, SitesProcessor,
};
use crate::processors::TimeoutProcessor;
use crate::progress::{ProgressTicker, RunProgress, RunSummary};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that prevent a run from starting
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid deduplication capacity: {0}")]
    Capacity(#[from] BrokerError),

    #[error("Dump source error: {0}")]
    Dump(#[from] DumpError),

    #[error("No available {0} dump")]
    NoDump(DumpContentType),
}

/// How the records of a dump reach the consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// XML export through extractor and broker
    Revisions,
    /// JSON snapshot straight to document processors
    JsonDocuments,
    /// SQL table to sites processors
    SitesTable,
}

impl ProcessingStrategy {
    pub fn for_content_type(content_type: DumpContentType) -> Self {
        match content_type {
            DumpContentType::Incremental | DumpContentType::Current | DumpContentType::Full => {
                ProcessingStrategy::Revisions
            }
            DumpContentType::Json => ProcessingStrategy::JsonDocuments,
            DumpContentType::Sites => ProcessingStrategy::SitesTable,
        }
    }
}

struct Registration<P> {
    processor: P,
    content_model: Option<String>,
    only_current: bool,
}

/// Façade over dump selection, extraction and dispatch
pub struct DumpProcessingController<'a> {
    config: Config,
    capacity: DedupCapacity,
    catalog: DumpCatalog,
    revision_processors: Vec<Registration<Box<dyn RevisionProcessor + 'a>>>,
    document_processors: Vec<Registration<Box<dyn EntityDocumentProcessor + 'a>>>,
    sites_processors: Vec<Box<dyn SitesProcessor + 'a>>,
    decoder: Box<dyn DocumentDecoder + 'a>,
    filter: Option<DocumentFilter>,
}

impl<'a> DumpProcessingController<'a> {
    /// Create a controller with the catalog described by the configuration
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let catalog = DumpCatalog::from_config(&config.dumps)?;
        Self::with_catalog(config, catalog)
    }

    /// Create a controller over an existing catalog
    pub fn with_catalog(config: Config, catalog: DumpCatalog) -> Result<Self, ControllerError> {
        let capacity = DedupCapacity::from_config(&config.dedup)?;
        let filter = DocumentFilter::from_config(&config.filter);
        Ok(Self {
            config,
            capacity,
            catalog,
            revision_processors: Vec::new(),
            document_processors: Vec::new(),
            sites_processors: Vec::new(),
            decoder: Box::new(JsonDocumentDecoder),
            filter,
        })
    }

    pub fn catalog(&self) -> &DumpCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to raw revisions
    ///
    /// `content_model` restricts delivery to one content model; `only_current`
    /// to the most current revision of each page.
    pub fn register_revision_processor(
        &mut self,
        processor: impl RevisionProcessor + 'a,
        content_model: Option<&str>,
        only_current: bool,
    ) {
        self.revision_processors.push(Registration {
            processor: Box::new(processor),
            content_model: content_model.map(str::to_string),
            only_current,
        });
    }

    /// Subscribe to decoded entity documents
    pub fn register_document_processor(
        &mut self,
        processor: impl EntityDocumentProcessor + 'a,
        content_model: Option<&str>,
        only_current: bool,
    ) {
        self.document_processors.push(Registration {
            processor: Box::new(processor),
            content_model: content_model.map(str::to_string),
            only_current,
        });
    }

    pub fn register_sites_processor(&mut self, processor: impl SitesProcessor + 'a) {
        self.sites_processors.push(Box::new(processor));
    }

    /// Replace the document filter (`None` delivers documents unchanged)
    pub fn set_document_filter(&mut self, filter: Option<DocumentFilter>) {
        self.filter = filter;
    }

    /// Replace the decoder turning revision text into documents
    pub fn set_document_decoder(&mut self, decoder: impl DocumentDecoder + 'a) {
        self.decoder = Box::new(decoder);
    }

    /// Whether no consumer needs revisions other than the current ones
    pub fn prefers_current(&self) -> bool {
        self.revision_processors.iter().all(|r| r.only_current)
            && self.document_processors.iter().all(|r| r.only_current)
    }

    /// Process the covering set of revision dumps, newest first
    ///
    /// Failing dumps are logged and recorded in the summary; the run goes on.
    pub fn process_all_recent_revision_dumps(&mut self) -> RunSummary {
        let dumps = self.catalog.select_covering_set(self.prefers_current());
        let handles: Vec<&dyn DumpFile> = dumps.iter().map(|d| d.as_ref() as &dyn DumpFile).collect();
        self.process_revision_dumps(&handles)
    }

    /// Process the newest main snapshot (current-only when possible)
    pub fn process_most_recent_main_dump(&mut self) -> Result<RunSummary, ControllerError> {
        let dump = if self.prefers_current() {
            self.catalog
                .most_recent(DumpContentType::Current)
                .or_else(|| self.catalog.most_recent(DumpContentType::Full))
        } else {
            self.catalog.most_recent(DumpContentType::Full)
        };
        let dump = dump.ok_or(ControllerError::NoDump(DumpContentType::Full))?;
        Ok(self.process_dump(dump.as_ref()))
    }

    /// Process the newest JSON snapshot
    pub fn process_most_recent_json_dump(&mut self) -> Result<RunSummary, ControllerError> {
        self.process_most_recent(DumpContentType::Json)
    }

    /// Process the newest sites table
    pub fn process_most_recent_sites_dump(&mut self) -> Result<RunSummary, ControllerError> {
        self.process_most_recent(DumpContentType::Sites)
    }

    fn process_most_recent(&mut self, content_type: DumpContentType) -> Result<RunSummary, ControllerError> {
        let dump = self
            .catalog
            .most_recent(content_type)
            .ok_or(ControllerError::NoDump(content_type))?;
        Ok(self.process_dump(dump.as_ref()))
    }

    /// Process one explicit dump with the strategy of its content type
    pub fn process_dump(&mut self, dump: &dyn DumpFile) -> RunSummary {
        match ProcessingStrategy::for_content_type(dump.descriptor().content_type()) {
            ProcessingStrategy::Revisions => self.process_revision_dumps(&[dump]),
            ProcessingStrategy::JsonDocuments => self.run_single(dump, Self::read_json_dump),
            ProcessingStrategy::SitesTable => self.run_single(dump, Self::read_sites_dump),
        }
    }

    fn new_progress(&self) -> RunProgress {
        RunProgress::new(
            self.config.processing.quiet,
            self.config.processing.progress_interval,
        )
    }

    fn timeout(&self) -> Option<TimeoutProcessor> {
        self.config
            .processing
            .timeout_secs
            .map(|secs| TimeoutProcessor::new(Duration::from_secs(secs)))
    }

    fn process_revision_dumps(&mut self, dumps: &[&dyn DumpFile]) -> RunSummary {
        let progress = self.new_progress();
        let timeout = self.timeout();
        let mut summary = RunSummary::default();

        let mut broker = RevisionBroker::new(self.capacity);
        for registration in &mut self.revision_processors {
            broker.register_subscriber(
                &mut registration.processor,
                registration.content_model.as_deref(),
                registration.only_current,
            );
        }
        for registration in &mut self.document_processors {
            let adapter = DocumentRevisionAdapter::new(
                self.decoder.as_ref(),
                self.filter.as_ref(),
                registration.processor.as_mut(),
            );
            broker.register_subscriber(
                adapter,
                registration.content_model.as_deref(),
                registration.only_current,
            );
        }
        broker.register_subscriber(ProgressTicker::new(&progress), None, false);
        if let Some(timeout) = timeout {
            broker.register_subscriber(timeout, None, false);
        }

        for dump in dumps {
            let label = dump.descriptor().to_string();
            progress.dump_started(&label);
            info!(dump = %label, local = dump.is_local(), "Processing dump");

            let extracted = match extract_revisions(*dump, &mut broker) {
                Err(ExtractError::Aborted(reason)) => {
                    warn!(dump = %label, reason = %reason, "Processing aborted");
                    summary.aborted = Some(reason);
                    break;
                }
                other => other,
            };

            // The pass is closed even when extraction failed midway
            let finished = broker.finish_pass();
            match extracted {
                Ok(stats) => {
                    summary.extract.add(&stats);
                    summary.dumps_processed.push(label.clone());
                }
                Err(e) => {
                    error!(dump = %label, error = %e, "Failed to process dump");
                    summary.record_failure(label.clone(), e);
                }
            }
            match finished {
                Ok(()) => {}
                Err(ProcessingError::Aborted(reason)) => {
                    warn!(dump = %label, reason = %reason, "Processing aborted");
                    summary.aborted = Some(reason);
                    break;
                }
                Err(e) => warn!(dump = %label, error = %e, "Failed to finish pass"),
            }
        }

        summary.broker = broker.stats().clone();
        drop(broker);
        self.finish_run(&progress, summary)
    }

    fn run_single<F>(&mut self, dump: &dyn DumpFile, read: F) -> RunSummary
    where
        F: FnOnce(&mut Self, &dyn DumpFile, &RunProgress, &mut RunSummary) -> Result<(), ExtractError>,
    {
        let progress = self.new_progress();
        let mut summary = RunSummary::default();
        let label = dump.descriptor().to_string();
        progress.dump_started(&label);
        info!(dump = %label, local = dump.is_local(), "Processing dump");

        match read(self, dump, &progress, &mut summary) {
            Ok(()) => summary.dumps_processed.push(label),
            Err(ExtractError::Aborted(reason)) => {
                warn!(dump = %label, reason = %reason, "Processing aborted");
                summary.aborted = Some(reason);
            }
            Err(e) => {
                error!(dump = %label, error = %e, "Failed to process dump");
                summary.record_failure(label, e);
            }
        }
        self.finish_run(&progress, summary)
    }

    fn finish_run(&self, progress: &RunProgress, mut summary: RunSummary) -> RunSummary {
        summary.elapsed_seconds = progress.elapsed_seconds();
        progress.finish(&summary);
        info!(
            processed = summary.dumps_processed.len(),
            failed = summary.dumps_failed.len(),
            aborted = summary.aborted.is_some(),
            elapsed_secs = summary.elapsed_seconds,
            "Run finished"
        );
        summary
    }

    fn read_json_dump(
        &mut self,
        dump: &dyn DumpFile,
        progress: &RunProgress,
        summary: &mut RunSummary,
    ) -> Result<(), ExtractError> {
        if self.document_processors.is_empty() {
            warn!(dump = %dump.descriptor(), "No document processors registered, skipping");
            return Ok(());
        }

        let timeout = self.timeout();
        let filter = self.filter.as_ref();
        let mut fanout = DocumentFanout {
            targets: Vec::new(),
            extras: Vec::new(),
        };
        for registration in &mut self.document_processors {
            fanout.targets.push((
                registration.content_model.as_deref(),
                FilteredDocuments::new(filter, registration.processor.as_mut()),
            ));
        }
        fanout.extras.push(Box::new(ProgressTicker::new(progress)));
        if let Some(timeout) = timeout {
            fanout.extras.push(Box::new(timeout));
        }

        let reader = dump.open()?;
        let stats = JsonDumpReader::new(reader, dump.descriptor().to_string()).run(&mut fanout)?;
        summary.documents += stats.documents;
        summary.document_errors += stats.decode_errors;
        Ok(())
    }

    fn read_sites_dump(
        &mut self,
        dump: &dyn DumpFile,
        _progress: &RunProgress,
        summary: &mut RunSummary,
    ) -> Result<(), ExtractError> {
        if self.sites_processors.is_empty() {
            warn!(dump = %dump.descriptor(), "No sites processors registered, skipping");
            return Ok(());
        }

        let mut fanout = SitesFanout(
            self.sites_processors
                .iter_mut()
                .map(|p| p.as_mut() as &mut dyn SitesProcessor)
                .collect(),
        );
        let reader = dump.open()?;
        summary.sites += SitesTableParser::new(reader, dump.descriptor().to_string()).run(&mut fanout)?;
        Ok(())
    }
}

/// Delivers snapshot documents to every processor whose content model matches
struct DocumentFanout<'b> {
    targets: Vec<(Option<&'b str>, FilteredDocuments<'b>)>,
    extras: Vec<Box<dyn EntityDocumentProcessor + 'b>>,
}

impl EntityDocumentProcessor for DocumentFanout<'_> {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
        let model = document.content_model();
        let mut first_error = None;
        let targets = self
            .targets
            .iter_mut()
            .filter(|(filter, _)| filter.map_or(true, |m| m == model))
            .map(|(_, processor)| processor as &mut dyn EntityDocumentProcessor);
        let extras = self
            .extras
            .iter_mut()
            .map(|processor| processor.as_mut() as &mut dyn EntityDocumentProcessor);

        for processor in targets.chain(extras) {
            match processor.process_document(document) {
                Ok(()) => {}
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn finish(&mut self) -> Result<(), ProcessingError> {
        for (_, processor) in &mut self.targets {
            processor.finish()?;
        }
        Ok(())
    }
}

/// Delivers sites to every sites processor
struct SitesFanout<'b>(Vec<&'b mut dyn SitesProcessor>);

impl SitesProcessor for SitesFanout<'_> {
    fn process_site(&mut self, site: &Site) -> Result<(), ProcessingError> {
        let mut first_error = None;
        for processor in &mut self.0 {
            match processor.process_site(site) {
                Ok(()) => {}
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
