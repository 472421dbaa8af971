//! Dump discovery and access
//!
//! A wiki farm publishes several kinds of dumps per project. This module knows
//! how they are named, where they live (locally and remotely), whether they are
//! complete, and which of them are needed to reach the current state.
//!
//! ```text
//!                     ┌──────────────────────────┐
//!                     │       DumpCatalog        │
//!                     │  merge + covering set    │
//!                     └──────────────────────────┘
//!                        │                    │
//!                        ▼                    ▼
//!            ┌──────────────────┐   ┌──────────────────────┐
//!            │    DumpCache     │   │   remote listing     │
//!            │ (dumpfiles/...)  │   │ (WebResourceFetcher) │
//!            └──────────────────┘   └──────────────────────┘
//!                        │                    │
//!                        ▼                    ▼
//!              LocalDumpFile          RemoteDumpFile
//!                        └──── dyn DumpFile ──┘
//! ```

pub mod cache;
pub mod catalog;
pub mod fetch;
pub mod handle;
pub mod listing;
pub mod remote;

pub use cache::{DumpCache, LocalDumpFile};
pub use catalog::DumpCatalog;
pub use fetch::{HttpFetcher, WebResourceFetcher};
pub use handle::DumpFile;
pub use remote::RemoteDumpFile;

use bzip2::read::MultiBzDecoder;
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;
use thiserror::Error;

/// Read buffer used for decompressed dump streams
const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Errors that can occur while locating, downloading or opening dumps
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid date stamp '{0}' (expected YYYYMMDD)")]
    InvalidDateStamp(String),

    #[error("Unknown dump content type '{0}'")]
    UnknownContentType(String),

    #[error("Dump {0} is not available")]
    Unavailable(String),

    #[error("Failed to persist download: {0}")]
    Persist(#[from] tempfile::PersistError),
}

// ============================================================================
// Content types
// ============================================================================

/// Kind of dump file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpContentType {
    /// Daily incremental dump: all revisions made since the previous one
    Incremental,
    /// Snapshot with only the current revision of every page
    Current,
    /// Snapshot with the complete history of every page
    Full,
    /// The `sites` table of the wiki farm
    Sites,
    /// Snapshot of all entities as JSON
    Json,
}

impl DumpContentType {
    pub const ALL: [DumpContentType; 5] = [
        DumpContentType::Incremental,
        DumpContentType::Current,
        DumpContentType::Full,
        DumpContentType::Sites,
        DumpContentType::Json,
    ];

    /// Name used for local cache directories (`{dir_name}-{date}`)
    pub fn dir_name(self) -> &'static str {
        match self {
            DumpContentType::Incremental => "incr",
            DumpContentType::Current => "current",
            DumpContentType::Full => "full",
            DumpContentType::Sites => "sites",
            DumpContentType::Json => "json",
        }
    }

    /// File name suffix following `{project}-{date}`
    pub fn file_suffix(self) -> &'static str {
        match self {
            DumpContentType::Incremental => "-pages-meta-hist-incr.xml.bz2",
            DumpContentType::Current => "-pages-meta-current.xml.bz2",
            DumpContentType::Full => "-pages-meta-history.xml.bz2",
            DumpContentType::Sites => "-sites.sql.gz",
            DumpContentType::Json => "-all.json.gz",
        }
    }

    /// Whether the dump is an XML revision export
    pub fn is_revision_dump(self) -> bool {
        matches!(
            self,
            DumpContentType::Incremental | DumpContentType::Current | DumpContentType::Full
        )
    }

    /// Whether the dump is a full snapshot usable as the base of a covering set
    pub fn is_snapshot(self) -> bool {
        matches!(self, DumpContentType::Current | DumpContentType::Full)
    }

    pub fn compression(self) -> Compression {
        Compression::from_file_name(self.file_suffix())
    }

    /// Job name in a published `dumpstatus.json`
    pub fn status_job(self) -> Option<&'static str> {
        match self {
            DumpContentType::Current => Some("metacurrentdump"),
            DumpContentType::Full => Some("metahistorybz2dump"),
            DumpContentType::Sites => Some("sitestable"),
            DumpContentType::Incremental | DumpContentType::Json => None,
        }
    }
}

impl fmt::Display for DumpContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for DumpContentType {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incr" | "incremental" | "daily" => Ok(DumpContentType::Incremental),
            "current" => Ok(DumpContentType::Current),
            "full" | "history" => Ok(DumpContentType::Full),
            "sites" => Ok(DumpContentType::Sites),
            "json" => Ok(DumpContentType::Json),
            other => Err(DumpError::UnknownContentType(other.to_string())),
        }
    }
}

/// Compression of a dump payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Gzip,
}

impl Compression {
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".bz2") {
            Compression::Bzip2
        } else if name.ends_with(".gz") {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    /// Wrap a raw byte stream into a buffered, decompressed stream
    pub fn decompress<'a>(self, raw: Box<dyn Read + 'a>) -> Box<dyn BufRead + 'a> {
        match self {
            Compression::None => Box::new(BufReader::with_capacity(STREAM_BUFFER_SIZE, raw)),
            Compression::Bzip2 => Box::new(BufReader::with_capacity(
                STREAM_BUFFER_SIZE,
                MultiBzDecoder::new(raw),
            )),
            Compression::Gzip => Box::new(BufReader::with_capacity(
                STREAM_BUFFER_SIZE,
                MultiGzDecoder::new(raw),
            )),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Identity of one dump file: project, content type and date stamp
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DumpDescriptor {
    project: String,
    content_type: DumpContentType,
    date_stamp: String,
}

impl DumpDescriptor {
    /// Create a descriptor, validating the `YYYYMMDD` date stamp
    pub fn new(
        project: impl Into<String>,
        content_type: DumpContentType,
        date_stamp: impl Into<String>,
    ) -> Result<Self, DumpError> {
        let date_stamp = date_stamp.into();
        if parse_date_stamp(&date_stamp).is_none() {
            return Err(DumpError::InvalidDateStamp(date_stamp));
        }
        Ok(Self {
            project: project.into(),
            content_type,
            date_stamp,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn content_type(&self) -> DumpContentType {
        self.content_type
    }

    pub fn date_stamp(&self) -> &str {
        &self.date_stamp
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_date_stamp(&self.date_stamp)
    }

    /// Published file name, e.g. `wikidatawiki-20240101-pages-meta-hist-incr.xml.bz2`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}{}",
            self.project,
            self.date_stamp,
            self.content_type.file_suffix()
        )
    }
}

impl fmt::Display for DumpDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.project, self.content_type, self.date_stamp)
    }
}

/// Parse a `YYYYMMDD` stamp
pub fn parse_date_stamp(stamp: &str) -> Option<NaiveDate> {
    if stamp.len() != 8 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

/// Sort handles newest first; snapshots precede incrementals of the same day
pub fn sort_newest_first(dumps: &mut [Box<dyn DumpFile>]) {
    dumps.sort_by(|a, b| {
        let (a, b) = (a.descriptor(), b.descriptor());
        b.date_stamp()
            .cmp(a.date_stamp())
            .then_with(|| b.content_type().is_snapshot().cmp(&a.content_type().is_snapshot()))
    });
}
