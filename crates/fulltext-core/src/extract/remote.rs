//! Remote structured-extraction service (GROBID-style `processFulltextDocument`).
//!
//! Failures here never fail a document; callers log them and carry on.

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Name of the multipart field carrying the document.
pub const INPUT_FIELD: &str = "input";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote service timed out after {0}s")]
    Timeout(u64),
    #[error("remote service returned HTTP {0}")]
    Status(u16),
    #[error("remote service request failed: {0}")]
    Transport(String),
    #[error("cannot read source for remote service: {0}")]
    Source(String),
}

pub struct RemoteService {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    limiter: DirectLimiter,
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteService {
    /// `requests_per_sec` of 0 is treated as 1.
    pub fn new(url: impl Into<String>, timeout: Duration, requests_per_sec: u32) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let rate = NonZeroU32::new(requests_per_sec).unwrap_or(NonZeroU32::MIN);
        Self {
            url: url.into(),
            client,
            timeout,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post the document and return the response body verbatim.
    ///
    /// The timeout covers waiting for a rate-limit slot as well as the
    /// exchange itself.
    pub async fn process(&self, path: &Path) -> Result<Vec<u8>, RemoteError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RemoteError::Source(e.to_string()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        match tokio::time::timeout(self.timeout, self.post(bytes, file_name)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn post(&self, bytes: Vec<u8>, file_name: String) -> Result<Vec<u8>, RemoteError> {
        self.limiter.until_ready().await;

        let form = reqwest::multipart::Form::new().part(
            INPUT_FIELD,
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout.as_secs())
            } else {
                RemoteError::Transport(e.to_string())
            }
        };

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        tracing::debug!(url = %self.url, bytes = body.len(), "remote service responded");
        Ok(body.to_vec())
    }
}
