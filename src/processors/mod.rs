//! Ready-made consumers
//!
//! - [`RevisionStatistics`]: counts revisions per content model and namespace
//! - [`JsonLinesWriter`]: writes revisions, documents or sites as JSON lines
//! - [`TimeoutProcessor`]: aborts a run after a deadline

mod jsonl;
mod stats;
mod timeout;

pub use jsonl::JsonLinesWriter;
pub use stats::RevisionStatistics;
pub use timeout::TimeoutProcessor;
