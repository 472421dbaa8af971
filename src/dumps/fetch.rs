//! HTTP access to the remote dump server

use super::DumpError;
use reqwest::blocking::Client;
use std::io::Read;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Source of remote resources (listings, markers, dump payloads)
pub trait WebResourceFetcher {
    /// Fetch a resource as a byte stream
    fn fetch(&self, url: &Url) -> Result<Box<dyn Read>, DumpError>;

    /// Fetch a small text resource
    fn fetch_string(&self, url: &Url) -> Result<String, DumpError> {
        let mut body = String::new();
        self.fetch(url)?.read_to_string(&mut body)?;
        Ok(body)
    }
}

/// Blocking HTTP fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given user agent
    ///
    /// `timeout` bounds each whole request, including the body download, so it
    /// should stay unset when dumps of several gigabytes are fetched.
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self, DumpError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl WebResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Box<dyn Read>, DumpError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DumpError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(Box::new(response))
    }
}
