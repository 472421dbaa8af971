//! dumpsync: incremental ingestion of wiki dumps
//!
//! Reconstructs an up-to-date, duplicate-free stream of page revisions from the
//! bulk snapshots and daily incremental dumps a wiki farm publishes:
//! - Dump discovery over a local cache and a remote dump server
//! - Covering-set selection (one snapshot plus every newer incremental)
//! - Streaming XML revision extraction with page-scoped error recovery
//! - Cross-dump deduplication and detection of each page's current revision
//! - JSON entity snapshots and the sites table as alternative sources

pub mod broker;
pub mod config;
pub mod controller;
pub mod documents;
pub mod dumps;
pub mod extract;
pub mod processor;
pub mod processors;
pub mod progress;
pub mod types;

pub use config::Config;
pub use controller::DumpProcessingController;
pub use types::*;
