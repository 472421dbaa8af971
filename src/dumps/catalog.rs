//! Dump source catalog: enumeration, merging and covering-set selection

use super::cache::DumpCache;
use super::fetch::{HttpFetcher, WebResourceFetcher};
use super::handle::DumpFile;
use super::listing::scrape_date_stamps;
use super::remote::{listing_path, RemoteDumpFile};
use super::{sort_newest_first, DumpContentType, DumpDescriptor, DumpError};
use crate::config::DumpsConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Remote dump server access
struct RemoteSource {
    base_url: Url,
    fetcher: Arc<dyn WebResourceFetcher>,
}

/// Enumerates the dumps of one project and picks the ones needed for a run
pub struct DumpCatalog {
    project: String,
    cache: DumpCache,
    remote: Option<RemoteSource>,
}

impl DumpCatalog {
    /// Catalog backed by the local cache and a remote server
    pub fn new(
        project: impl Into<String>,
        cache: DumpCache,
        base_url: Url,
        fetcher: Arc<dyn WebResourceFetcher>,
    ) -> Self {
        Self {
            project: project.into(),
            cache,
            remote: Some(RemoteSource { base_url, fetcher }),
        }
    }

    /// Catalog that only looks at the local cache
    pub fn offline(project: impl Into<String>, cache: DumpCache) -> Self {
        Self {
            project: project.into(),
            cache,
            remote: None,
        }
    }

    /// Build a catalog from configuration, using HTTP for remote access
    pub fn from_config(config: &DumpsConfig) -> Result<Self, DumpError> {
        let cache = DumpCache::new(&config.download_root);
        if config.offline {
            info!(project = %config.project, "Offline mode: only cached dumps are used");
            return Ok(Self::offline(&config.project, cache));
        }

        let base_url = Url::parse(&config.base_url)?;
        let fetcher = HttpFetcher::new(
            &config.user_agent,
            config.request_timeout_secs.map(Duration::from_secs),
        )?;
        Ok(Self::new(&config.project, cache, base_url, Arc::new(fetcher)))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn is_offline(&self) -> bool {
        self.remote.is_none()
    }

    /// Complete dumps of one type in the local cache, newest first
    pub fn enumerate_local(&self, content_type: DumpContentType) -> Vec<Box<dyn DumpFile>> {
        self.cache
            .scan(&self.project, content_type)
            .into_iter()
            .map(|dump| Box::new(dump) as Box<dyn DumpFile>)
            .collect()
    }

    /// Dumps of one type listed on the remote server, newest first
    ///
    /// Listing failures are logged and yield no candidates.
    pub fn enumerate_remote(&self, content_type: DumpContentType) -> Vec<Box<dyn DumpFile>> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };

        let listing = match remote
            .base_url
            .join(&listing_path(&self.project, content_type))
            .map_err(DumpError::from)
            .and_then(|url| remote.fetcher.fetch_string(&url))
        {
            Ok(listing) => listing,
            Err(e) => {
                warn!(
                    project = %self.project,
                    content_type = %content_type,
                    error = %e,
                    "Could not fetch remote dump listing, continuing without remote dumps"
                );
                return Vec::new();
            }
        };

        let dumps: Vec<Box<dyn DumpFile>> = scrape_date_stamps(&listing)
            .into_iter()
            .filter_map(|stamp| DumpDescriptor::new(&self.project, content_type, stamp).ok())
            .map(|descriptor| {
                Box::new(RemoteDumpFile::new(
                    descriptor,
                    remote.base_url.clone(),
                    remote.fetcher.clone(),
                    self.cache.clone(),
                )) as Box<dyn DumpFile>
            })
            .collect();

        debug!(
            project = %self.project,
            content_type = %content_type,
            count = dumps.len(),
            "Found remote dumps"
        );
        dumps
    }

    /// Merge local and remote handles; local wins on equal identity
    ///
    /// The result is sorted newest first.
    pub fn merge(
        local: Vec<Box<dyn DumpFile>>,
        remote: Vec<Box<dyn DumpFile>>,
    ) -> Vec<Box<dyn DumpFile>> {
        let mut seen: HashSet<DumpDescriptor> = HashSet::new();
        let mut merged: Vec<Box<dyn DumpFile>> = local
            .into_iter()
            .chain(remote)
            .filter(|dump| seen.insert(dump.descriptor().clone()))
            .collect();
        sort_newest_first(&mut merged);
        merged
    }

    /// All known dumps of one type, local ones preferred
    pub fn all_dumps(&self, content_type: DumpContentType) -> Vec<Box<dyn DumpFile>> {
        Self::merge(
            self.enumerate_local(content_type),
            self.enumerate_remote(content_type),
        )
    }

    /// The newest available dump of one type
    pub fn most_recent(&self, content_type: DumpContentType) -> Option<Box<dyn DumpFile>> {
        let dump = self.newest_available(content_type);
        if dump.is_none() {
            warn!(project = %self.project, content_type = %content_type, "No available dump found");
        }
        dump
    }

    /// Minimal set of dumps reconstructing the current state, newest first
    ///
    /// One snapshot (current-only when `prefer_current`, falling back to full
    /// history) plus every available incremental strictly newer than it. Without
    /// any snapshot, all available incrementals are returned.
    pub fn select_covering_set(&self, prefer_current: bool) -> Vec<Box<dyn DumpFile>> {
        let mut snapshot = None;
        if prefer_current {
            snapshot = self.newest_available(DumpContentType::Current);
            if snapshot.is_none() {
                info!(project = %self.project, "No current-only dump, falling back to full history");
            }
        }
        if snapshot.is_none() {
            snapshot = self.newest_available(DumpContentType::Full);
        }

        let incrementals = self.all_dumps(DumpContentType::Incremental);
        let mut selected: Vec<Box<dyn DumpFile>> = match &snapshot {
            Some(base) => {
                let cutoff = base.descriptor().date_stamp().to_string();
                incrementals
                    .into_iter()
                    .filter(|dump| dump.descriptor().date_stamp() > cutoff.as_str())
                    .filter(|dump| dump.is_available())
                    .collect()
            }
            None => {
                warn!(
                    project = %self.project,
                    "No snapshot dump available, coverage is limited to incremental dumps"
                );
                incrementals
                    .into_iter()
                    .filter(|dump| dump.is_available())
                    .collect()
            }
        };

        if let Some(base) = snapshot {
            selected.push(base);
        }
        sort_newest_first(&mut selected);

        match (selected.first(), selected.last()) {
            (Some(newest), Some(oldest)) => info!(
                project = %self.project,
                dumps = selected.len(),
                newest = %newest.descriptor(),
                oldest = %oldest.descriptor(),
                "Selected dumps to process"
            ),
            _ => warn!(project = %self.project, "No dumps available to process"),
        }
        selected
    }

    fn newest_available(&self, content_type: DumpContentType) -> Option<Box<dyn DumpFile>> {
        self.all_dumps(content_type)
            .into_iter()
            .find(|dump| dump.is_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CannedFetcher {
        resources: HashMap<String, String>,
    }

    impl CannedFetcher {
        fn with(mut self, path: &str, body: &str) -> Self {
            self.resources
                .insert(format!("{}{}", BASE, path), body.to_string());
            self
        }
    }

    impl WebResourceFetcher for CannedFetcher {
        fn fetch(&self, url: &Url) -> Result<Box<dyn Read>, DumpError> {
            match self.resources.get(url.as_str()) {
                Some(body) => Ok(Box::new(Cursor::new(body.clone().into_bytes()))),
                None => Err(DumpError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    const BASE: &str = "https://dumps.example.org/";

    fn listing(stamps: &[&str]) -> String {
        let rows: Vec<String> = stamps
            .iter()
            .map(|s| {
                format!(
                    "<tr><td class=\"n\"><a href=\"{s}/\">{s}</a>/</td><td class=\"m\">-</td></tr>"
                )
            })
            .collect();
        format!("<html><table>\n{}\n</table></html>", rows.join("\n"))
    }

    fn incremental_server(stamps: &[&str]) -> CannedFetcher {
        let mut fetcher = CannedFetcher::default().with("other/incr/testwiki/", &listing(stamps));
        for stamp in stamps {
            fetcher = fetcher.with(&format!("other/incr/testwiki/{}/status.txt", stamp), "done");
        }
        fetcher
    }

    fn catalog(temp: &TempDir, fetcher: CannedFetcher) -> DumpCatalog {
        DumpCatalog::new(
            "testwiki",
            DumpCache::new(temp.path()),
            Url::parse(BASE).unwrap(),
            Arc::new(fetcher),
        )
    }

    fn store_local(temp: &TempDir, ty: DumpContentType, date: &str) {
        let desc = DumpDescriptor::new("testwiki", ty, date).unwrap();
        DumpCache::new(temp.path())
            .store(&desc, &b"cached"[..], Some(100))
            .unwrap();
    }

    fn identities(dumps: &[Box<dyn DumpFile>]) -> Vec<String> {
        dumps.iter().map(|d| d.descriptor().to_string()).collect()
    }

    #[test]
    fn test_covering_set_with_local_snapshot() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Full, "20240101");
        let catalog = catalog(&temp, incremental_server(&["20240102", "20240103", "20240105"]));

        let selected = catalog.select_covering_set(false);
        assert_eq!(
            identities(&selected),
            vec![
                "testwiki-incr-20240105",
                "testwiki-incr-20240103",
                "testwiki-incr-20240102",
                "testwiki-full-20240101",
            ]
        );
        assert!(selected[3].is_local());
    }

    #[test]
    fn test_covering_set_excludes_incrementals_older_than_snapshot() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Full, "20240103");
        let catalog = catalog(&temp, incremental_server(&["20240102", "20240103", "20240105"]));

        let selected = catalog.select_covering_set(false);
        assert_eq!(
            identities(&selected),
            vec!["testwiki-incr-20240105", "testwiki-full-20240103"]
        );
    }

    #[test]
    fn test_covering_set_without_snapshot() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp, incremental_server(&["20240102", "20240103", "20240105"]));

        let selected = catalog.select_covering_set(true);
        assert_eq!(
            identities(&selected),
            vec![
                "testwiki-incr-20240105",
                "testwiki-incr-20240103",
                "testwiki-incr-20240102",
            ]
        );
    }

    #[test]
    fn test_prefer_current_snapshot() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Full, "20240101");
        store_local(&temp, DumpContentType::Current, "20240102");
        let catalog = catalog(&temp, incremental_server(&["20240102", "20240103"]));

        assert_eq!(
            identities(&catalog.select_covering_set(true)),
            vec!["testwiki-incr-20240103", "testwiki-current-20240102"]
        );
        assert_eq!(
            identities(&catalog.select_covering_set(false)),
            vec![
                "testwiki-incr-20240103",
                "testwiki-incr-20240102",
                "testwiki-full-20240101",
            ]
        );
    }

    #[test]
    fn test_unfinished_incrementals_are_skipped() {
        let temp = TempDir::new().unwrap();
        let fetcher = incremental_server(&["20240102"])
            .with("other/incr/testwiki/", &listing(&["20240102", "20240103"]))
            .with("other/incr/testwiki/20240103/status.txt", "running");
        let catalog = catalog(&temp, fetcher);

        assert_eq!(
            identities(&catalog.select_covering_set(true)),
            vec!["testwiki-incr-20240102"]
        );
    }

    #[test]
    fn test_most_recent_skips_unavailable() {
        let temp = TempDir::new().unwrap();
        let fetcher = incremental_server(&["20240102"])
            .with("other/incr/testwiki/", &listing(&["20240102", "20240103"]))
            .with("other/incr/testwiki/20240103/status.txt", "running");
        let catalog = catalog(&temp, fetcher);

        let newest = catalog.most_recent(DumpContentType::Incremental).unwrap();
        assert_eq!(newest.descriptor().to_string(), "testwiki-incr-20240102");
        assert!(catalog.most_recent(DumpContentType::Full).is_none());
    }

    #[test]
    fn test_merge_prefers_local() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Incremental, "20240103");
        let catalog = catalog(&temp, incremental_server(&["20240103"]));

        let merged = DumpCatalog::merge(
            catalog.enumerate_local(DumpContentType::Incremental),
            catalog.enumerate_remote(DumpContentType::Incremental),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].descriptor().date_stamp(), "20240103");
        assert!(merged[0].is_local());
    }

    #[test]
    fn test_listing_failure_degrades_to_local() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Incremental, "20240102");
        let catalog = catalog(&temp, CannedFetcher::default());

        assert!(catalog.enumerate_remote(DumpContentType::Incremental).is_empty());
        assert_eq!(
            identities(&catalog.all_dumps(DumpContentType::Incremental)),
            vec!["testwiki-incr-20240102"]
        );
    }

    #[test]
    fn test_offline_catalog_makes_no_requests() {
        let temp = TempDir::new().unwrap();
        store_local(&temp, DumpContentType::Current, "20240101");
        let catalog = DumpCatalog::offline("testwiki", DumpCache::new(temp.path()));

        assert!(catalog.is_offline());
        assert!(catalog.enumerate_remote(DumpContentType::Current).is_empty());
        let recent = catalog
            .most_recent(DumpContentType::Current)
            .expect("cached dump");
        assert_eq!(recent.descriptor().date_stamp(), "20240101");
    }
}
