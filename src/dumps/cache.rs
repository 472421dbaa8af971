//! Local dump cache
//!
//! Layout: `{root}/dumpfiles/{project}/{type}-{date}/{file name}`. Revision dumps
//! carry a sibling `maxrevid.txt` that is written only after the payload landed,
//! so its presence marks the download as complete. Payloads themselves are written
//! to a temporary file and renamed into place.

use super::handle::DumpFile;
use super::{DumpContentType, DumpDescriptor, DumpError};
use std::fs::{self, File};
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Name of the completion marker of revision dumps
pub const MAX_REVISION_ID_FILE: &str = "maxrevid.txt";

/// Root directory of the local cache
const DUMP_FILES_DIR: &str = "dumpfiles";

/// Local dump cache rooted at the configured download directory
#[derive(Debug, Clone)]
pub struct DumpCache {
    root: PathBuf,
}

impl DumpCache {
    pub fn new(download_root: impl AsRef<Path>) -> Self {
        Self {
            root: download_root.as_ref().join(DUMP_FILES_DIR),
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    /// Directory holding one dump and its marker
    pub fn dump_dir(&self, descriptor: &DumpDescriptor) -> PathBuf {
        self.project_dir(descriptor.project()).join(format!(
            "{}-{}",
            descriptor.content_type().dir_name(),
            descriptor.date_stamp()
        ))
    }

    pub fn payload_path(&self, descriptor: &DumpDescriptor) -> PathBuf {
        self.dump_dir(descriptor).join(descriptor.file_name())
    }

    /// Load a cached dump if it is complete
    pub fn load(&self, descriptor: &DumpDescriptor) -> Option<LocalDumpFile> {
        let path = self.payload_path(descriptor);
        if !path.is_file() {
            return None;
        }

        let max_revision_id = if descriptor.content_type().is_revision_dump() {
            let marker = self.dump_dir(descriptor).join(MAX_REVISION_ID_FILE);
            match read_max_revision_id(&marker) {
                Some(id) => Some(id),
                None => {
                    debug!(dump = %descriptor, "Cached dump has no completion marker, ignoring");
                    return None;
                }
            }
        } else {
            None
        };

        Some(LocalDumpFile {
            descriptor: descriptor.clone(),
            path,
            max_revision_id,
        })
    }

    /// Enumerate complete cached dumps of one type, newest first
    pub fn scan(&self, project: &str, content_type: DumpContentType) -> Vec<LocalDumpFile> {
        let dir = self.project_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let prefix = format!("{}-", content_type.dir_name());
        let mut dumps: Vec<LocalDumpFile> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let stamp = name.to_str()?.strip_prefix(prefix.as_str())?.to_string();
                DumpDescriptor::new(project, content_type, stamp).ok()
            })
            .filter_map(|descriptor| self.load(&descriptor))
            .collect();

        dumps.sort_by(|a, b| b.descriptor.date_stamp().cmp(a.descriptor.date_stamp()));
        dumps
    }

    /// Store a payload atomically, then write the completion marker
    pub fn store(
        &self,
        descriptor: &DumpDescriptor,
        mut payload: impl Read,
        max_revision_id: Option<u64>,
    ) -> Result<LocalDumpFile, DumpError> {
        let dir = self.dump_dir(descriptor);
        fs::create_dir_all(&dir)?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        let bytes = std::io::copy(&mut payload, &mut temp)?;
        temp.as_file().sync_all()?;
        let path = self.payload_path(descriptor);
        temp.persist(&path)?;

        let max_revision_id = if descriptor.content_type().is_revision_dump() {
            // 0 records "complete, maximum unknown"
            let id = max_revision_id.unwrap_or(0);
            let mut marker = NamedTempFile::new_in(&dir)?;
            writeln!(marker, "{}", id)?;
            marker.persist(dir.join(MAX_REVISION_ID_FILE))?;
            Some(id)
        } else {
            None
        };

        info!(dump = %descriptor, bytes, path = %path.display(), "Stored dump in local cache");

        Ok(LocalDumpFile {
            descriptor: descriptor.clone(),
            path,
            max_revision_id,
        })
    }
}

fn read_max_revision_id(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// A complete dump in the local cache (or any file on disk)
#[derive(Debug, Clone)]
pub struct LocalDumpFile {
    descriptor: DumpDescriptor,
    path: PathBuf,
    max_revision_id: Option<u64>,
}

impl LocalDumpFile {
    /// Wrap an arbitrary dump file on disk
    pub fn from_path(descriptor: DumpDescriptor, path: impl Into<PathBuf>) -> Self {
        Self {
            descriptor,
            path: path.into(),
            max_revision_id: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DumpFile for LocalDumpFile {
    fn descriptor(&self) -> &DumpDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn max_revision_id(&self) -> Option<u64> {
        self.max_revision_id
    }

    fn is_local(&self) -> bool {
        true
    }

    fn open(&self) -> Result<Box<dyn BufRead>, DumpError> {
        let file = File::open(&self.path)?;
        let name = self.path.to_string_lossy();
        Ok(super::Compression::from_file_name(&name).decompress(Box::new(file)))
    }
}
