// src/repository/fetch.rs

//! Metadata transport
//!
//! Sync never talks to the network directly; it goes through a
//! [`MetadataFetcher`]. The bundled [`HttpFetcher`] handles `http(s)` via
//! reqwest and `file://` locators from the local filesystem;
//! [`MemoryFetcher`] serves documents held in memory.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The resource does not exist at this location
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other transfer failure
    #[error("Failed to fetch {url}: {reason}")]
    Transfer { url: String, reason: String },
}

/// Source of repository metadata bytes
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher that also reads `file://` locators
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("pkgcore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transfer {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn fetch_file(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let path = url.to_file_path().map_err(|_| FetchError::Transfer {
            url: url.to_string(),
            reason: "not a local path".to_string(),
        })?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(url.to_string()),
            _ => FetchError::Transfer {
                url: url.to_string(),
                reason: e.to_string(),
            },
        })
    }

    async fn fetch_http(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let transfer = |reason: String| FetchError::Transfer {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transfer(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound(url.to_string())),
            status if !status.is_success() => Err(transfer(format!("HTTP {status}"))),
            _ => {
                let bytes = response.bytes().await.map_err(|e| transfer(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        debug!("Fetching {}", url);
        match url.scheme() {
            "file" => self.fetch_file(url).await,
            "http" | "https" | "ftp" => self.fetch_http(url).await,
            other => Err(FetchError::Transfer {
                url: url.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }
}

/// Fetcher serving documents from memory
///
/// Used for preloaded metadata and offline runs. Counts fetches per URL and
/// can delay every response to hold a fetch in flight.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    counts: RwLock<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve `data` at `url`, replacing any previous document
    pub fn insert(&self, url: &str, data: impl Into<Vec<u8>>) {
        self.documents.write().insert(url.to_string(), data.into());
    }

    pub fn remove(&self, url: &str) {
        self.documents.write().remove(url);
    }

    /// Number of fetches of one URL, successful or not
    pub fn fetch_count(&self, url: &str) -> usize {
        self.counts.read().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.counts.read().values().sum()
    }
}

#[async_trait]
impl MetadataFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        *self.counts.write().entry(url.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.documents
            .read()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
