//! Retrieval of generated images returned inline or by URL

use crate::io::configuration::{FETCH_MAX_BYTES, FETCH_MAX_REDIRECTS, FETCH_TIMEOUT_MS};
use crate::io::error::{Result, fetch_failure};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// Image handed back by the generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    /// Encoded image bytes
    Bytes(Vec<u8>),
    /// Location to download the encoded image from
    Url(String),
}

/// Source of encoded image bytes for URLs
pub trait ImageFetcher: Send + Sync {
    /// Download the body at `url`
    ///
    /// # Errors
    ///
    /// Returns `ImageFetchFailure` for transport errors and any status other
    /// than 200
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Resolve a generated image to encoded bytes
///
/// # Errors
///
/// Propagates the fetcher's `ImageFetchFailure` for URL sources
pub fn resolve_bytes(image: &GeneratedImage, fetcher: &dyn ImageFetcher) -> Result<Vec<u8>> {
    match image {
        GeneratedImage::Bytes(bytes) => Ok(bytes.clone()),
        GeneratedImage::Url(url) => fetcher.fetch(url),
    }
}

/// Blocking HTTP fetcher following redirects
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(FETCH_TIMEOUT_MS))
    }
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(FETCH_MAX_REDIRECTS)
            .build();
        Self {
            agent,
            max_bytes: FETCH_MAX_BYTES,
        }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(|err| match &err {
            ureq::Error::Status(code, _) => fetch_failure(url, Some(*code), &"unexpected status"),
            _ => fetch_failure(url, None, &err),
        })?;

        let status = response.status();
        if status != 200 {
            return Err(fetch_failure(url, Some(status), &"unexpected status"));
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| fetch_failure(url, Some(status), &e))?;

        if body.len() as u64 > self.max_bytes {
            return Err(fetch_failure(
                url,
                Some(status),
                &format!("body exceeds {} bytes", self.max_bytes),
            ));
        }

        debug!(url, bytes = body.len(), "fetched generated image");
        Ok(body)
    }
}
