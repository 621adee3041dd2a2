//! HTTP client with built-in retry logic and error classification.

use log::{debug, warn};
use reqwest::{Client, Url};
use std::io::Write;

use super::retry::{RetryPolicy, classify_status, fetch_error};
use crate::error::FetchError;

/// HTTP client that streams downloads and retries transient failures.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Downloads `url` into a writer, returning the number of bytes written.
    ///
    /// `create_writer` is called once per attempt and must return a writer
    /// positioned at the start of an empty destination. Transient failures are
    /// retried per the client's [`RetryPolicy`]; permanent ones return at once.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<u64, FetchError>
    where
        W: Write,
        F: Fn() -> Result<W, FetchError>,
    {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::permanent(url, format!("invalid URL: {}", e)))?;

        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            match self.download_file_once(&parsed, url, &create_writer).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "Download attempt {}/{} failed ({}), retrying in {}ms...",
                        attempt,
                        attempts,
                        e.message,
                        self.retry.delay.as_millis()
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Download of {} failed after {} attempt(s): {}", url, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Single download attempt without retry.
    async fn download_file_once<W, F>(
        &self,
        parsed: &Url,
        url: &str,
        create_writer: &F,
    ) -> Result<u64, FetchError>
    where
        W: Write,
        F: Fn() -> Result<W, FetchError>,
    {
        let mut response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| fetch_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError {
                kind: classify_status(status),
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(url, &e))? {
            writer.write_all(&chunk).map_err(|e| {
                FetchError::permanent(url, format!("failed to write download: {}", e))
            })?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer
            .flush()
            .map_err(|e| FetchError::permanent(url, format!("failed to flush download: {}", e)))?;

        if downloaded_bytes == 0 {
            return Err(FetchError::permanent(url, "empty response body"));
        }

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }
}
