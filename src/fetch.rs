//! Track byte fetching
//!
//! The core is agnostic to how track bytes are obtained: the engine and the
//! preload cache both work through the [`TrackFetcher`] trait. [`HttpFetcher`]
//! covers the common case of HTTP(S) URLs with streaming download progress;
//! [`StaticFetcher`] serves bytes bundled with the host application.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Incremental fetch progress callback (0-100)
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Byte-fetch abstraction over whatever transport the host provides
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// Fetch the complete byte content of `url`, reporting incremental
    /// progress when a callback is given
    async fn fetch(&self, url: &str, on_progress: Option<ProgressFn>) -> Result<Vec<u8>>;
}

/// File extension from a URL path, for the decoder's format probe hint
pub fn extension_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// HTTP(S) fetcher built on reqwest with streamed progress
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, on_progress: Option<ProgressFn>) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("Request failed for {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "HTTP {} fetching {}",
                response.status(),
                url
            )));
        }

        let total = response.content_length();
        let mut bytes: Vec<u8> = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::Fetch(format!("Stream error for {}: {}", url, e)))?;
            bytes.extend_from_slice(&chunk);

            if let (Some(cb), Some(total)) = (&on_progress, total) {
                if total > 0 {
                    let percent = ((bytes.len() as u64 * 100) / total).min(100) as u8;
                    cb(percent);
                }
            }
        }

        if let Some(cb) = &on_progress {
            cb(100);
        }
        debug!(url, bytes = bytes.len(), "Fetched track bytes");
        Ok(bytes)
    }
}

/// Fetcher serving bytes bundled in memory (assets shipped with the host)
///
/// Unknown URLs fail the fetch, which also makes this the standard test
/// double for load-failure scenarios.
#[derive(Default)]
pub struct StaticFetcher {
    assets: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.assets.insert(url.into(), bytes);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(url.into(), bytes);
    }
}

#[async_trait]
impl TrackFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, on_progress: Option<ProgressFn>) -> Result<Vec<u8>> {
        match self.assets.get(url) {
            Some(bytes) => {
                if let Some(cb) = &on_progress {
                    cb(100);
                }
                Ok(bytes.clone())
            }
            None => Err(Error::Fetch(format!("No bundled asset for {}", url))),
        }
    }
}
