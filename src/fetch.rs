//! Byte transport for manifests, frames and segments.
//!
//! Everything above this module sees a [`Fetcher`]: "give me these bytes of
//! this URL". [`HttpFetcher`] serves `http(s)` URLs with reqwest and local
//! paths from disk, so a track can be played straight out of a directory.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use tracing::trace;

use crate::{common::errors::FetchError, manifest::ByteRange};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, or only `range` of it when given.
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(url).header(header::ACCEPT, "*/*");
        if let Some(range) = range {
            request = request.header(header::RANGE, range.header_value());
        }

        let res = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        // 206 Partial Content is what we expect for ranges; any non-2xx is an error.
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let partial = status == StatusCode::PARTIAL_CONTENT;
        let body = res.bytes().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        match range {
            // Server ignored the Range header and sent the whole file.
            Some(range) if !partial => slice(url, body, range),
            Some(range) if (body.len() as u64) < range.length => Err(FetchError::ShortRange {
                url: url.to_string(),
                expected: range.length,
                actual: body.len() as u64,
            }),
            _ => Ok(body),
        }
    }

    async fn fetch_file(&self, path: &str, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
        let body = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.to_string()));
            }
            Err(_) => {
                return Err(FetchError::Status {
                    url: path.to_string(),
                    status: 500,
                });
            }
        };

        match range {
            Some(range) => slice(path, body, range),
            None => Ok(body),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
        trace!("GET {} range={:?}", url, range);
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url, range).await
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            self.fetch_file(path, range).await
        }
    }
}

fn slice(url: &str, body: Bytes, range: ByteRange) -> Result<Bytes, FetchError> {
    let start = range.start as usize;
    let end = start.saturating_add(range.length as usize);
    if end > body.len() {
        return Err(FetchError::ShortRange {
            url: url.to_string(),
            expected: range.length,
            actual: body.len().saturating_sub(start) as u64,
        });
    }
    Ok(body.slice(start..end))
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::{HashMap, HashSet},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::*;

    /// In-memory fetcher. Unknown URLs answer with a synthetic body so tests
    /// only register the files whose content matters.
    #[derive(Default)]
    pub struct MemoryFetcher {
        files: Mutex<HashMap<String, Bytes>>,
        failing: Mutex<HashSet<String>>,
        requests: Mutex<Vec<(String, Option<ByteRange>)>>,
        latency: Option<Duration>,
    }

    impl MemoryFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency: Some(latency),
                ..Self::default()
            }
        }

        pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
            self.files.lock().insert(url.to_string(), body.into());
        }

        pub fn fail(&self, url: &str) {
            self.failing.lock().insert(url.to_string());
        }

        pub fn heal(&self, url: &str) {
            self.failing.lock().remove(url);
        }

        pub fn requests(&self) -> Vec<(String, Option<ByteRange>)> {
            self.requests.lock().clone()
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.requests.lock().iter().filter(|(u, _)| u == url).count()
        }
    }

    #[async_trait]
    impl Fetcher for MemoryFetcher {
        async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
            self.requests.lock().push((url.to_string(), range));
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.failing.lock().contains(url) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }

            let body = self.files.lock().get(url).cloned();
            match (body, range) {
                (Some(body), Some(range)) => slice(url, body, range),
                (Some(body), None) => Ok(body),
                (None, _) => Ok(Bytes::from(url.to_string())),
            }
        }
    }
}
