//! Entity documents decoded from revision text or JSON snapshots
//!
//! Documents are kept as untyped JSON; typed entity models are left to
//! consumers. This module provides the decoding seam, the field-level filter
//! and the adapter that plugs document consumers into the revision broker.

use crate::config::FilterConfig;
use crate::processor::{EntityDocumentProcessor, ProcessingError, RevisionProcessor};
use crate::types::{Revision, RevisionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while decoding a document
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document has no '{0}' field")]
    MissingField(&'static str),

    #[error("Document is not a JSON object")]
    NotAnObject,
}

/// One entity (item, property, lexeme, ...) as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    /// Entity id, e.g. "Q42"
    pub id: String,
    /// Entity type, e.g. "item"
    pub entity_type: String,
    /// Revision the document was taken from (0 if unknown)
    pub revision_id: RevisionId,
    /// Full JSON representation
    pub data: Value,
}

impl EntityDocument {
    /// Build a document from its JSON representation
    pub fn from_value(data: Value) -> Result<Self, DecodeError> {
        let object = data.as_object().ok_or(DecodeError::NotAnObject)?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("id"))?
            .to_string();
        let entity_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("type"))?
            .to_string();
        let revision_id = object.get("lastrevid").and_then(Value::as_u64).unwrap_or(0);
        Ok(Self {
            id,
            entity_type,
            revision_id,
            data,
        })
    }

    /// Content model of revisions holding this kind of entity
    pub fn content_model(&self) -> String {
        format!("wikibase-{}", self.entity_type)
    }

    /// Label in a language, if present
    pub fn label(&self, language: &str) -> Option<&str> {
        self.data
            .get("labels")?
            .get(language)?
            .get("value")?
            .as_str()
    }
}

/// Turns revision text into an entity document
pub trait DocumentDecoder {
    /// Decode a revision; `Ok(None)` for revisions that hold no entity
    /// (wikitext pages, entity redirects)
    fn decode(&self, revision: &Revision) -> Result<Option<EntityDocument>, DecodeError>;
}

/// Decoder for revisions whose text is the entity JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentDecoder;

impl DocumentDecoder for JsonDocumentDecoder {
    fn decode(&self, revision: &Revision) -> Result<Option<EntityDocument>, DecodeError> {
        if !revision.is_json() || revision.text.trim().is_empty() {
            return Ok(None);
        }
        let data: Value = serde_json::from_str(&revision.text)?;
        if data.get("redirect").is_some() {
            return Ok(None);
        }
        let mut document = EntityDocument::from_value(data)?;
        if document.revision_id == 0 {
            document.revision_id = revision.revision_id;
        }
        Ok(Some(document))
    }
}

/// Field-level allow-lists applied to documents before delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    languages: Option<HashSet<String>>,
    sites: Option<HashSet<String>>,
    properties: Option<HashSet<String>>,
}

const LANGUAGE_FIELDS: [&str; 4] = ["labels", "descriptions", "aliases", "lemmas"];
const STATEMENT_FIELDS: [&str; 2] = ["claims", "statements"];

impl DocumentFilter {
    /// Filter for the configured allow-lists, `None` if none is configured
    pub fn from_config(config: &FilterConfig) -> Option<Self> {
        if !config.is_active() {
            return None;
        }
        let set = |list: &Option<Vec<String>>| list.as_ref().map(|l| l.iter().cloned().collect());
        Some(Self {
            languages: set(&config.languages),
            sites: set(&config.sites),
            properties: set(&config.properties),
        })
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = Some(sites.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    /// Remove everything not on an allow-list
    pub fn apply(&self, document: &mut EntityDocument) {
        let Some(object) = document.data.as_object_mut() else {
            return;
        };
        if let Some(languages) = &self.languages {
            for field in LANGUAGE_FIELDS {
                retain_keys(object, field, languages);
            }
        }
        if let Some(sites) = &self.sites {
            retain_keys(object, "sitelinks", sites);
        }
        if let Some(properties) = &self.properties {
            for field in STATEMENT_FIELDS {
                retain_keys(object, field, properties);
            }
        }
    }
}

fn retain_keys(object: &mut Map<String, Value>, field: &str, allowed: &HashSet<String>) {
    if let Some(Value::Object(entries)) = object.get_mut(field) {
        entries.retain(|key, _| allowed.contains(key));
    }
}

/// Document consumer behind an optional filter
pub struct FilteredDocuments<'a> {
    filter: Option<&'a DocumentFilter>,
    inner: &'a mut dyn EntityDocumentProcessor,
}

impl<'a> FilteredDocuments<'a> {
    pub fn new(filter: Option<&'a DocumentFilter>, inner: &'a mut dyn EntityDocumentProcessor) -> Self {
        Self { filter, inner }
    }
}

impl EntityDocumentProcessor for FilteredDocuments<'_> {
    fn process_document(&mut self, document: &EntityDocument) -> Result<(), ProcessingError> {
        match self.filter {
            Some(filter) => {
                let mut filtered = document.clone();
                filter.apply(&mut filtered);
                self.inner.process_document(&filtered)
            }
            None => self.inner.process_document(document),
        }
    }

    fn finish(&mut self) -> Result<(), ProcessingError> {
        self.inner.finish()
    }
}

/// Revision subscriber that decodes revisions and feeds a document consumer
///
/// Revisions that fail to decode are logged, counted and skipped.
pub struct DocumentRevisionAdapter<'a> {
    decoder: &'a dyn DocumentDecoder,
    filter: Option<&'a DocumentFilter>,
    inner: &'a mut dyn EntityDocumentProcessor,
    decode_errors: u64,
}

impl<'a> DocumentRevisionAdapter<'a> {
    pub fn new(
        decoder: &'a dyn DocumentDecoder,
        filter: Option<&'a DocumentFilter>,
        inner: &'a mut dyn EntityDocumentProcessor,
    ) -> Self {
        Self {
            decoder,
            filter,
            inner,
            decode_errors: 0,
        }
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}

impl RevisionProcessor for DocumentRevisionAdapter<'_> {
    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        let mut document = match self.decoder.decode(revision) {
            Ok(Some(document)) => document,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.decode_errors += 1;
                warn!(
                    page_id = revision.page_id,
                    revision_id = revision.revision_id,
                    title = %revision.title,
                    error = %e,
                    "Failed to decode revision"
                );
                return Ok(());
            }
        };
        if let Some(filter) = self.filter {
            filter.apply(&mut document);
        }
        self.inner.process_document(&document)
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        self.inner.finish()
    }
}
