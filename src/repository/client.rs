// src/repository/client.rs

//! HTTP client for channel operations
//!
//! Provides the [`Upstream`] capability the reconciler works against, and
//! [`ChannelClient`], its reqwest-backed implementation with bounded retry
//! on connection failures.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::metadata::{PackageRecord, RepoIndex};
use crate::error::{Error, Result};

/// Default base URL for repodata of named channels
pub const DEFAULT_REPO_BASE: &str = "https://conda.anaconda.org";

/// Default base URL for package downloads of named channels
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://anaconda.org";

/// Default timeout for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default overall timeout for one request, body included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Maximum attempts for requests failing to connect
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Source of repodata and package bytes for one channel
pub trait Upstream: Send + Sync {
    /// Channel identifier, for messages
    fn channel(&self) -> &str;

    /// Fetch the channel's repodata for a platform
    fn fetch_index(&self, platform: &str) -> Result<RepoIndex>;

    /// Open a byte stream for one package
    fn open_package(
        &self,
        platform: &str,
        file_name: &str,
        record: &PackageRecord,
    ) -> Result<Box<dyn Read + Send>>;
}

/// URL layout for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUrls {
    channel: String,
    repo_base: String,
    download_base: String,
}

impl ChannelUrls {
    /// Layout for `channel`, which may be a name (`conda-forge`) or a full
    /// channel URL (`https://repo.continuum.io/pkgs/free`)
    pub fn new(channel: &str, repo_base: Option<&str>, download_base: Option<&str>) -> Self {
        Self {
            channel: channel.trim_end_matches('/').to_string(),
            repo_base: repo_base
                .unwrap_or(DEFAULT_REPO_BASE)
                .trim_end_matches('/')
                .to_string(),
            download_base: download_base
                .unwrap_or(DEFAULT_DOWNLOAD_BASE)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the channel was given as a full URL
    pub fn is_url(&self) -> bool {
        self.channel.starts_with("http://") || self.channel.starts_with("https://")
    }

    pub fn repodata_url(&self, platform: &str) -> String {
        if self.is_url() {
            format!("{}/{}/repodata.json", self.channel, platform)
        } else {
            format!("{}/{}/{}/repodata.json", self.repo_base, self.channel, platform)
        }
    }

    pub fn package_url(&self, platform: &str, file_name: &str, record: &PackageRecord) -> String {
        if self.is_url() {
            format!("{}/{}/{}", self.channel, platform, file_name)
        } else {
            format!(
                "{}/{}/{}/{}/download/{}/{}",
                self.download_base, self.channel, record.name, record.version, platform, file_name
            )
        }
    }
}

/// HTTP settings for [`ChannelClient`]
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

/// HTTP client wrapper with retry support
pub struct ChannelClient {
    client: Client,
    urls: ChannelUrls,
    max_retries: u32,
}

impl ChannelClient {
    /// Create a new channel client
    pub fn new(urls: ChannelUrls, options: &HttpOptions) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.timeout)
            .user_agent(concat!("conda-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            urls,
            max_retries: options.max_retries.max(1),
        })
    }

    /// GET a URL, retrying only when the connection itself fails
    ///
    /// Non-2xx responses are returned as errors immediately.
    fn get(&self, url: &str) -> std::result::Result<Response, String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(describe_status(status, url));
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    warn!("Request attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                Err(e) => {
                    return Err(format!("Failed to fetch {} after {attempt} attempt(s): {e}", url));
                }
            }
        }
    }
}

fn describe_status(status: StatusCode, url: &str) -> String {
    format!("HTTP {} from {}", status, url)
}

impl Upstream for ChannelClient {
    fn channel(&self) -> &str {
        self.urls.channel()
    }

    fn fetch_index(&self, platform: &str) -> Result<RepoIndex> {
        let url = self.urls.repodata_url(platform);
        info!("Fetching repository metadata from {}", url);

        let response = self.get(&url).map_err(Error::FetchError)?;
        let body = response
            .bytes()
            .map_err(|e| Error::FetchError(format!("Failed to read response from {}: {e}", url)))?;

        let index = RepoIndex::from_slice(&body).map_err(|e| {
            Error::FetchError(format!("Failed to parse repodata JSON from {}: {e}", url))
        })?;

        info!(
            "Successfully fetched metadata for {} packages ({})",
            index.packages.len(),
            platform
        );
        Ok(index)
    }

    fn open_package(
        &self,
        platform: &str,
        file_name: &str,
        record: &PackageRecord,
    ) -> Result<Box<dyn Read + Send>> {
        let url = self.urls.package_url(platform, file_name, record);
        debug!("Opening {}", url);

        let response = self.get(&url).map_err(Error::DownloadError)?;
        if let Some(length) = response.content_length() {
            if length != record.size {
                debug!(
                    "{}: server reports {} bytes, repodata declares {}",
                    file_name, length, record.size
                );
            }
        }
        Ok(Box::new(response))
    }
}
