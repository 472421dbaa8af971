//! Dumps published on the remote dump server
//!
//! Server layout (relative to the configured base URL):
//!
//! | type        | listing                      | dump directory                      |
//! |-------------|------------------------------|-------------------------------------|
//! | incremental | `other/incr/{project}/`      | `other/incr/{project}/{date}/`      |
//! | current     | `{project}/`                 | `{project}/{date}/`                 |
//! | full        | `{project}/`                 | `{project}/{date}/`                 |
//! | sites       | `{project}/`                 | `{project}/{date}/`                 |
//! | json        | `other/wikibase/{project}/`  | `other/wikibase/{project}/{date}/`  |
//!
//! Incrementals are complete once `status.txt` reads `done`; main dumps once their
//! job in `dumpstatus.json` reports `done`. JSON snapshots are only listed when
//! finished.

use super::cache::DumpCache;
use super::fetch::WebResourceFetcher;
use super::handle::DumpFile;
use super::{DumpContentType, DumpDescriptor, DumpError};
use serde::Deserialize;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const INCREMENTAL_STATUS_FILE: &str = "status.txt";
const DUMP_STATUS_FILE: &str = "dumpstatus.json";
const REMOTE_MAX_REVISION_ID_FILE: &str = "maxrevid.txt";

/// Relative path of the listing for one content type
pub fn listing_path(project: &str, content_type: DumpContentType) -> String {
    match content_type {
        DumpContentType::Incremental => format!("other/incr/{}/", project),
        DumpContentType::Json => format!("other/wikibase/{}/", project),
        DumpContentType::Current | DumpContentType::Full | DumpContentType::Sites => {
            format!("{}/", project)
        }
    }
}

/// Relative path of the directory holding one dump
pub fn dump_dir_path(descriptor: &DumpDescriptor) -> String {
    format!(
        "{}{}/",
        listing_path(descriptor.project(), descriptor.content_type()),
        descriptor.date_stamp()
    )
}

/// Incremental directory of the same day; it publishes the day's max revision id
fn incremental_dir_path(descriptor: &DumpDescriptor) -> String {
    format!(
        "{}{}/",
        listing_path(descriptor.project(), DumpContentType::Incremental),
        descriptor.date_stamp()
    )
}

#[derive(Debug, Deserialize)]
struct DumpStatus {
    #[serde(default)]
    jobs: HashMap<String, JobStatus>,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
}

/// A dump on the remote server, downloaded into the local cache on first open
pub struct RemoteDumpFile {
    descriptor: DumpDescriptor,
    base_url: Url,
    fetcher: Arc<dyn WebResourceFetcher>,
    cache: DumpCache,
    available: OnceCell<bool>,
    max_revision_id: OnceCell<Option<u64>>,
}

impl RemoteDumpFile {
    pub fn new(
        descriptor: DumpDescriptor,
        base_url: Url,
        fetcher: Arc<dyn WebResourceFetcher>,
        cache: DumpCache,
    ) -> Self {
        Self {
            descriptor,
            base_url,
            fetcher,
            cache,
            available: OnceCell::new(),
            max_revision_id: OnceCell::new(),
        }
    }

    /// Download URL of the payload
    pub fn url(&self) -> Result<Url, DumpError> {
        let path = format!("{}{}", dump_dir_path(&self.descriptor), self.descriptor.file_name());
        Ok(self.base_url.join(&path)?)
    }

    fn fetch_text(&self, relative: &str) -> Result<String, DumpError> {
        let url = self.base_url.join(relative)?;
        self.fetcher.fetch_string(&url)
    }

    fn check_availability(&self) -> Result<bool, DumpError> {
        let content_type = self.descriptor.content_type();
        match content_type {
            DumpContentType::Incremental => {
                let status = self.fetch_text(&format!(
                    "{}{}",
                    dump_dir_path(&self.descriptor),
                    INCREMENTAL_STATUS_FILE
                ))?;
                Ok(status.trim() == "done")
            }
            DumpContentType::Current | DumpContentType::Full | DumpContentType::Sites => {
                let body = self.fetch_text(&format!(
                    "{}{}",
                    dump_dir_path(&self.descriptor),
                    DUMP_STATUS_FILE
                ))?;
                let status: DumpStatus = serde_json::from_str(&body)?;
                let done = content_type
                    .status_job()
                    .and_then(|job| status.jobs.get(job))
                    .map(|job| job.status == "done")
                    .unwrap_or(false);
                Ok(done)
            }
            DumpContentType::Json => Ok(true),
        }
    }

    fn fetch_max_revision_id(&self) -> Result<Option<u64>, DumpError> {
        if !self.descriptor.content_type().is_revision_dump() {
            return Ok(None);
        }
        let body = self.fetch_text(&format!(
            "{}{}",
            incremental_dir_path(&self.descriptor),
            REMOTE_MAX_REVISION_ID_FILE
        ))?;
        Ok(body.trim().parse().ok())
    }
}

impl DumpFile for RemoteDumpFile {
    fn descriptor(&self) -> &DumpDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| match self.check_availability() {
            Ok(available) => {
                debug!(dump = %self.descriptor, available, "Checked remote availability");
                available
            }
            Err(e) => {
                warn!(dump = %self.descriptor, error = %e, "Could not check remote availability");
                false
            }
        })
    }

    fn max_revision_id(&self) -> Option<u64> {
        *self
            .max_revision_id
            .get_or_init(|| match self.fetch_max_revision_id() {
                Ok(id) => id,
                Err(e) => {
                    debug!(dump = %self.descriptor, error = %e, "No remote max revision id");
                    None
                }
            })
    }

    fn is_local(&self) -> bool {
        false
    }

    fn open(&self) -> Result<Box<dyn BufRead>, DumpError> {
        if !self.is_available() {
            return Err(DumpError::Unavailable(self.descriptor.to_string()));
        }

        let url = self.url()?;
        info!(dump = %self.descriptor, %url, "Downloading dump");
        let payload = self.fetcher.fetch(&url)?;
        let local = self
            .cache
            .store(&self.descriptor, payload, self.max_revision_id())?;
        local.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves canned resources and records requests
    #[derive(Default)]
    struct CannedFetcher {
        resources: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.resources.insert(url.to_string(), body.to_vec());
            self
        }
    }

    impl WebResourceFetcher for CannedFetcher {
        fn fetch(&self, url: &Url) -> Result<Box<dyn Read>, DumpError> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(url.to_string());
            match self.resources.get(url.as_str()) {
                Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
                None => Err(DumpError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    const BASE: &str = "https://dumps.example.org/";

    fn remote(fetcher: Arc<CannedFetcher>, ty: DumpContentType, date: &str, root: &TempDir) -> RemoteDumpFile {
        RemoteDumpFile::new(
            DumpDescriptor::new("testwiki", ty, date).unwrap(),
            Url::parse(BASE).unwrap(),
            fetcher,
            DumpCache::new(root.path()),
        )
    }

    #[test]
    fn test_incremental_availability_and_download() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with("https://dumps.example.org/other/incr/testwiki/20240102/status.txt", b"done\n")
                .with("https://dumps.example.org/other/incr/testwiki/20240102/maxrevid.txt", b"987\n")
                .with(
                    "https://dumps.example.org/other/incr/testwiki/20240102/testwiki-20240102-pages-meta-hist-incr.xml.bz2",
                    b"not really bz2",
                ),
        );
        let dump = remote(fetcher.clone(), DumpContentType::Incremental, "20240102", &temp);

        assert!(dump.is_available());
        assert!(dump.is_available());
        assert_eq!(dump.max_revision_id(), Some(987));

        // The status file is only requested once
        let status_requests = fetcher
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.ends_with("status.txt"))
            .count();
        assert_eq!(status_requests, 1);

        dump.open().unwrap();
        let cache = DumpCache::new(temp.path());
        let local = cache.load(dump.descriptor()).expect("download is cached");
        assert_eq!(local.max_revision_id(), Some(987));
    }

    #[test]
    fn test_unfinished_incremental_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(CannedFetcher::default().with(
            "https://dumps.example.org/other/incr/testwiki/20240103/status.txt",
            b"in-progress",
        ));
        let dump = remote(fetcher, DumpContentType::Incremental, "20240103", &temp);
        assert!(!dump.is_available());
        assert!(matches!(dump.open(), Err(DumpError::Unavailable(_))));
    }

    #[test]
    fn test_main_dump_status_json() {
        let temp = TempDir::new().unwrap();
        let status = br#"{"jobs": {"metacurrentdump": {"status": "done"}, "metahistorybz2dump": {"status": "in-progress"}}}"#;
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with("https://dumps.example.org/testwiki/20240101/dumpstatus.json", status),
        );

        let current = remote(fetcher.clone(), DumpContentType::Current, "20240101", &temp);
        let full = remote(fetcher, DumpContentType::Full, "20240101", &temp);
        assert!(current.is_available());
        assert!(!full.is_available());
    }

    #[test]
    fn test_network_errors_mean_unavailable() {
        let temp = TempDir::new().unwrap();
        let dump = remote(
            Arc::new(CannedFetcher::default()),
            DumpContentType::Sites,
            "20240101",
            &temp,
        );
        assert!(!dump.is_available());
        assert_eq!(dump.max_revision_id(), None);
    }

    #[test]
    fn test_download_url() {
        let temp = TempDir::new().unwrap();
        let dump = remote(Arc::new(CannedFetcher::default()), DumpContentType::Json, "20240108", &temp);
        assert_eq!(
            dump.url().unwrap().as_str(),
            "https://dumps.example.org/other/wikibase/testwiki/20240108/testwiki-20240108-all.json.gz"
        );
    }
}
