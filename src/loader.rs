//! Schema loading from strings, files and URLs.
//!
//! The [`Fetch`] trait is the seam the reference resolver uses to retrieve
//! external documents. [`UrlFetcher`] serves `file://` and (with the `remote`
//! feature) `http(s)://` URLs; [`StaticFetcher`] serves documents registered
//! in memory; [`NoFetch`] keeps a session offline.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use serde_json::Value;
use url::Url;

use crate::error::FetchError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves a JSON document by URL.
///
/// Implementations only need GET semantics. The returned future is polled on
/// the caller's executor and does not need to be `Send`.
pub trait Fetch {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<Value, FetchError>>;
}

/// Load a schema from a file path.
///
/// # Errors
///
/// Returns `FetchError::FileNotFound` if the file doesn't exist,
/// or `FetchError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, FetchError> {
    if !path.exists() {
        return Err(FetchError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| FetchError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| FetchError::InvalidJson { source })
}

/// Load a schema from a JSON string.
///
/// # Errors
///
/// Returns `FetchError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, FetchError> {
    serde_json::from_str(content).map_err(|source| FetchError::InvalidJson { source })
}

/// Cache key for a document URL: the URL without its fragment.
pub(crate) fn document_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Fetches `file://` URLs from disk and `http(s)://` URLs over the network.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    #[cfg(feature = "remote")]
    timeout: Duration,
}

impl UrlFetcher {
    /// Create a fetcher with the default HTTP timeout.
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "remote")]
            timeout: HTTP_TIMEOUT,
        }
    }

    /// Set the HTTP request timeout.
    #[cfg(feature = "remote")]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(feature = "remote")]
    async fn fetch_http(&self, url: &Url) -> Result<Value, FetchError> {
        let network_error = |source| FetchError::NetworkError {
            url: url.to_string(),
            source,
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(network_error)?;

        let response = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(network_error)?;

        // Check for HTTP errors before parsing
        let response = response.error_for_status().map_err(network_error)?;

        response.json().await.map_err(network_error)
    }
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for UrlFetcher {
    async fn fetch(&self, url: &Url) -> Result<Value, FetchError> {
        match url.scheme() {
            "file" => {
                let path = url.to_file_path().map_err(|()| FetchError::UnsupportedScheme {
                    url: url.to_string(),
                })?;
                load_schema(&path)
            }
            #[cfg(feature = "remote")]
            "http" | "https" => self.fetch_http(url).await,
            _ => Err(FetchError::UnsupportedScheme {
                url: url.to_string(),
            }),
        }
    }
}

/// Serves documents registered in memory, keyed by URL without fragment.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    documents: HashMap<String, Value>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` under `url`.
    pub fn with(mut self, url: &Url, document: Value) -> Self {
        self.insert(url, document);
        self
    }

    pub fn insert(&mut self, url: &Url, document: Value) {
        self.documents.insert(document_key(url), document);
    }
}

impl Fetch for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Value, FetchError> {
        self.documents
            .get(&document_key(url))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            })
    }
}

/// Declines every URL. External references stay unresolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFetch;

impl Fetch for NoFetch {
    async fn fetch(&self, url: &Url) -> Result<Value, FetchError> {
        Err(FetchError::NotFound {
            url: url.to_string(),
        })
    }
}
