//! Core types shared by the extraction and dispatch pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric page identifier
pub type PageId = u64;

/// Numeric revision identifier, unique per project
pub type RevisionId = u64;

/// Well-known content model names
pub mod content_model {
    pub const WIKITEXT: &str = "wikitext";
    pub const WIKIBASE_ITEM: &str = "wikibase-item";
    pub const WIKIBASE_PROPERTY: &str = "wikibase-property";
    pub const WIKIBASE_LEXEME: &str = "wikibase-lexeme";
    pub const JSON: &str = "json";
}

/// Default format of wikitext revisions in exports that predate `<format>`
pub const DEFAULT_FORMAT: &str = "text/x-wiki";

// ============================================================================
// Site information
// ============================================================================

/// Namespace number to title prefix mapping of one dump pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceTable {
    prefixes: BTreeMap<i32, String>,
}

impl NamespaceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace prefix (empty for the main namespace)
    pub fn insert(&mut self, key: i32, prefix: impl Into<String>) {
        self.prefixes.insert(key, prefix.into());
    }

    /// Prefix of a namespace, if declared
    pub fn prefix(&self, key: i32) -> Option<&str> {
        self.prefixes.get(&key).map(String::as_str)
    }

    /// Namespace number for a prefix
    pub fn key_for(&self, prefix: &str) -> Option<i32> {
        self.prefixes
            .iter()
            .find(|(_, p)| p.as_str() == prefix)
            .map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.prefixes.iter().map(|(k, p)| (*k, p.as_str()))
    }

    pub fn clear(&mut self) {
        self.prefixes.clear();
    }
}

/// Contents of a dump's `<siteinfo>` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    /// Human readable site name, e.g. "Wikidata"
    pub site_name: String,
    /// URL of the main page; article URLs are derived from it
    pub base_url: String,
    /// Namespaces declared for this pass
    pub namespaces: NamespaceTable,
}

impl SiteInfo {
    pub fn clear(&mut self) {
        self.site_name.clear();
        self.base_url.clear();
        self.namespaces.clear();
    }

    /// Article path prefix derived from the base URL
    /// (`https://www.wikidata.org/wiki/Main_Page` -> `https://www.wikidata.org/wiki/`)
    pub fn article_path(&self) -> Option<&str> {
        let end = self.base_url.rfind('/')?;
        Some(&self.base_url[..=end])
    }
}

// ============================================================================
// Revisions
// ============================================================================

/// Author of a revision
///
/// Registered users carry a numeric id; anonymous edits only have an IP address
/// as their name. Suppressed contributors have neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Contributor {
    pub fn is_anonymous(&self) -> bool {
        self.id.is_none() && !self.name.is_empty()
    }

    pub fn clear(&mut self) {
        self.name.clear();
        self.id = None;
    }
}

/// One revision of a page, as found in an XML export
///
/// The extractor fills a single instance field by field and hands out `&Revision`
/// for the duration of one callback. Consumers that keep a revision past the
/// callback take a copy with `clone()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub page_id: PageId,
    pub namespace: i32,
    pub title: String,
    pub revision_id: RevisionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RevisionId>,
    /// ISO 8601 timestamp as written in the dump
    pub timestamp: String,
    pub content_model: String,
    pub format: String,
    pub text: String,
    pub contributor: Contributor,
    pub comment: String,
}

impl Default for Revision {
    fn default() -> Self {
        Self {
            page_id: 0,
            namespace: 0,
            title: String::new(),
            revision_id: 0,
            parent_id: None,
            timestamp: String::new(),
            content_model: content_model::WIKITEXT.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            text: String::new(),
            contributor: Contributor::default(),
            comment: String::new(),
        }
    }
}

impl Revision {
    /// Clear page-level fields before reading a new `<page>`
    pub fn reset_page(&mut self) {
        self.page_id = 0;
        self.namespace = 0;
        self.title.clear();
        self.reset_revision();
    }

    /// Clear revision-level fields, keeping page identity
    pub fn reset_revision(&mut self) {
        self.revision_id = 0;
        self.parent_id = None;
        self.timestamp.clear();
        self.content_model.clear();
        self.content_model.push_str(content_model::WIKITEXT);
        self.format.clear();
        self.format.push_str(DEFAULT_FORMAT);
        self.text.clear();
        self.contributor.clear();
        self.comment.clear();
    }

    /// Parsed revision timestamp
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Whether the revision carries a JSON payload (entity content)
    pub fn is_json(&self) -> bool {
        self.format == "application/json"
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "revision {} of page {} ({})",
            self.revision_id, self.page_id, self.title
        )
    }
}
