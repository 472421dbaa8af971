//! Handle abstraction over local and remote dump files

use super::{DumpDescriptor, DumpError};
use std::io::BufRead;

/// Identity and lazy content access for one dump file
///
/// Availability and the maximal revision id may require network access for remote
/// dumps; implementations resolve them on first use and memoize the answer.
pub trait DumpFile {
    fn descriptor(&self) -> &DumpDescriptor;

    /// Whether the dump is complete and can be opened
    fn is_available(&self) -> bool;

    /// Highest revision id contained in a revision dump, if known
    fn max_revision_id(&self) -> Option<u64>;

    /// Whether the payload is already in the local cache
    fn is_local(&self) -> bool;

    /// Open a decompressed stream over the dump contents
    ///
    /// Remote dumps are downloaded into the local cache first.
    fn open(&self) -> Result<Box<dyn BufRead>, DumpError>;
}

impl std::fmt::Debug for dyn DumpFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpFile")
            .field("descriptor", &self.descriptor().to_string())
            .field("local", &self.is_local())
            .finish()
    }
}
