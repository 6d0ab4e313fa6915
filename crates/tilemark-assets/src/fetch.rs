// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mirror fetchers: HTTP(S), local files, and in-memory payloads.
//
// Each fetch is a single GET-equivalent bounded by a timeout. The resolver
// also races every attempt against the same timeout, so a fetcher that
// ignores it still cannot stall a resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tilemark_core::error::{Result, TilemarkError};
use tracing::{debug, instrument};

/// Retrieves the raw payload behind a mirror URL.
#[async_trait]
pub trait MirrorFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

// -- HTTP ---------------------------------------------------------------------

/// `http://` and `https://` mirrors via reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tilemark/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TilemarkError::Fetch(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MirrorFetcher for HttpFetcher {
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TilemarkError::Timeout(timeout.as_millis() as u64)
                } else {
                    TilemarkError::Fetch(format!("GET {url} failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TilemarkError::Fetch(format!("GET {url} returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TilemarkError::Fetch(format!("reading body of {url} failed: {e}")))?;

        debug!(bytes = bytes.len(), "mirror payload downloaded");
        Ok(bytes.to_vec())
    }
}

// -- Files --------------------------------------------------------------------

/// `file://` mirrors, for capabilities shipped alongside the binary.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_of(url: &str) -> Result<PathBuf> {
        url.strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| TilemarkError::Fetch(format!("not a file URL: {url}")))
    }
}

#[async_trait]
impl MirrorFetcher for FileFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        let path = Self::path_of(url)?;
        let bytes = tokio::fs::read(&path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "mirror file read");
        Ok(bytes)
    }
}

// -- Memory -------------------------------------------------------------------

/// Pre-seeded `mem://` payloads for embedded capabilities.
///
/// Keeps a per-URL fetch count so callers can observe de-duplication.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<HashMap<String, u32>>,
    latency: Duration,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated per-fetch latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_payload(self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes.into());
    }

    pub fn remove(&self, url: &str) {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// How many times `url` has been requested.
    pub fn fetch_count(&self, url: &str) -> u32 {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Total requests across all URLs.
    pub fn total_fetches(&self) -> u32 {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

#[async_trait]
impl MirrorFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default() += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| TilemarkError::Fetch(format!("no payload at {url}")))
    }
}

// -- Routing ------------------------------------------------------------------

/// Dispatches by URL scheme to the fetcher registered for it.
#[derive(Default, Clone)]
pub struct RoutingFetcher {
    routes: HashMap<String, Arc<dyn MirrorFetcher>>,
}

impl RoutingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for `scheme` (without `://`).
    pub fn route(mut self, scheme: &str, fetcher: Arc<dyn MirrorFetcher>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), fetcher);
        self
    }

    /// HTTP(S) and `file://` routes, plus `mem://` backed by `memory`.
    pub fn standard(memory: Arc<MemoryFetcher>) -> Result<Self> {
        let http: Arc<dyn MirrorFetcher> = Arc::new(HttpFetcher::new()?);
        Ok(Self::new()
            .route("http", Arc::clone(&http))
            .route("https", http)
            .route("file", Arc::new(FileFetcher))
            .route("mem", memory))
    }
}

#[async_trait]
impl MirrorFetcher for RoutingFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| TilemarkError::Fetch(format!("mirror URL has no scheme: {url}")))?;

        let fetcher = self
            .routes
            .get(&scheme)
            .ok_or_else(|| TilemarkError::Fetch(format!("no fetcher for scheme '{scheme}'")))?;

        fetcher.fetch(url, timeout).await
    }
}
