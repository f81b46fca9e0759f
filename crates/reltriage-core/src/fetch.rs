//! Bounded HTTP body fetching.
//!
//! Every network access in the pipeline goes through [`BodyFetcher`] so
//! tests can substitute canned documents. The production implementation
//! races the whole request (connect plus full body read) against a timer;
//! if the timer fires first the in-flight request is dropped and the
//! caller gets a distinguished [`TriageError::DownloadTimeout`]. Nothing
//! is cached, nothing is retried.

use crate::error::{Result, TriageError};
use async_trait::async_trait;
use std::time::Duration;

/// Timeout for summary pages, directory listings and small metadata files.
pub const BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for JUnit artifact downloads. The files run to tens of
/// megabytes and the storage backend throttles them, so give these longer.
pub const JUNIT_TIMEOUT: Duration = Duration::from_secs(50);

/// Timeout for release payload status pages.
pub const PAYLOAD_PAGE_TIMEOUT: Duration = Duration::from_secs(50);

/// Injectable URL-body source.
///
/// Implement this to plug in the real HTTP client or test stubs.
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    /// Fetch the full body at `url`, bounded by `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// reqwest-backed [`BodyFetcher`].
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reltriage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BodyFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let request = async {
            let response = self.client.get(url).send().await?;
            let body = response.bytes().await?;
            Ok::<_, TriageError>(body.to_vec())
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            // Timer fired first: abandon the request, do not retry.
            Err(_) => Err(TriageError::DownloadTimeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}
