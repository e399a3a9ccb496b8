// src/source/http.rs

//! HTTP clients for the distribution mirror and the community repository
//!
//! Both wrap an async reqwest client with bounded retry. A 404 is a
//! definitive `NotFound`; other failures become `SourceUnavailable` once the
//! retries are used up.

use super::{DistributionClient, RepositoryClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts per request
pub const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Public repository endpoint serving application archives
pub const DEFAULT_REPOSITORY_URL: &str = "https://hbb1.oscwii.org/api/contents/";

/// Shared GET-with-retry logic
struct Fetcher {
    client: Client,
    base: Url,
    max_retries: u32,
}

impl Fetcher {
    fn new(base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| Error::ParseError(format!("Invalid source URL '{base_url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            max_retries: max_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::ParseError(format!("Invalid path '{path}': {e}")))
    }

    async fn get_bytes(&self, url: &Url, what: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.client.get(url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(Error::NotFound(format!("{what} at {url}")));
                }
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) => {
                        debug!("Fetched {} bytes from {}", body.len(), url);
                        return Ok(body.to_vec());
                    }
                    Err(e) => format!("failed to read body: {e}"),
                },
                Ok(response) if response.status().is_client_error() => {
                    return Err(Error::SourceUnavailable(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(Error::SourceUnavailable(format!(
                    "Failed to fetch {what} from {url} after {attempt} attempts: {failure}"
                )));
            }
            warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, what, failure);
            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt))).await;
        }
    }
}

/// Prebuilt title packages from a distribution mirror
///
/// Packages live at `<base>/<titleid>/v<version>.wad`, or `latest.wad`
/// when no version is requested.
pub struct HttpMirrorClient {
    fetcher: Fetcher,
}

impl HttpMirrorClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(base_url, HTTP_TIMEOUT, MAX_RETRIES)
    }

    pub fn with_options(base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(base_url, timeout, max_retries)?,
        })
    }

    pub fn package_url(&self, title_id: &str, version: Option<u16>) -> Result<Url> {
        let file = match version {
            Some(v) => format!("v{v}.wad"),
            None => "latest.wad".to_string(),
        };
        self.fetcher.url(&format!("{}/{}", title_id.to_lowercase(), file))
    }
}

#[async_trait]
impl DistributionClient for HttpMirrorClient {
    async fn fetch_package(&self, title_id: &str, version: Option<u16>) -> Result<Vec<u8>> {
        let url = self.package_url(title_id, version)?;
        info!("Downloading title {} from {}", title_id, url);
        let what = match version {
            Some(v) => format!("title {title_id} v{v}"),
            None => format!("title {title_id}"),
        };
        self.fetcher.get_bytes(&url, &what).await
    }

    fn name(&self) -> &str {
        "mirror"
    }
}

/// Application archives from the community repository
///
/// Archives live at `<base><slug>/<slug>.zip`.
pub struct HttpRepositoryClient {
    fetcher: Fetcher,
}

impl HttpRepositoryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(base_url, HTTP_TIMEOUT, MAX_RETRIES)
    }

    pub fn with_options(base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(base_url, timeout, max_retries)?,
        })
    }

    pub fn archive_url(&self, slug: &str) -> Result<Url> {
        self.fetcher.url(&format!("{slug}/{slug}.zip"))
    }
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn fetch_archive(&self, slug: &str) -> Result<Vec<u8>> {
        let url = self.archive_url(slug)?;
        info!("Downloading {} from {}", slug, url);
        self.fetcher.get_bytes(&url, &format!("archive '{slug}'")).await
    }

    fn name(&self) -> &str {
        "repository"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_urls() {
        let client = HttpMirrorClient::new("https://mirror.example.org/titles").unwrap();
        assert_eq!(
            client.package_url("0000000100000038", Some(5661)).unwrap().as_str(),
            "https://mirror.example.org/titles/0000000100000038/v5661.wad"
        );
        assert_eq!(
            client.package_url("000000010000003A", None).unwrap().as_str(),
            "https://mirror.example.org/titles/000000010000003a/latest.wad"
        );
    }

    #[test]
    fn test_repository_urls() {
        let client = HttpRepositoryClient::new(DEFAULT_REPOSITORY_URL).unwrap();
        assert_eq!(
            client.archive_url("homebrew_browser").unwrap().as_str(),
            "https://hbb1.oscwii.org/api/contents/homebrew_browser/homebrew_browser.zip"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpMirrorClient::new("not a url"),
            Err(Error::ParseError(_))
        ));
    }
}
