//! Retry policy and transient/permanent classification for downloads.

use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{FetchError, FetchErrorKind};

/// Default number of attempts for a download.
pub const MAX_RETRIES: usize = 3;

/// Default delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// How many times, and how far apart, transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Try exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES, Duration::from_millis(RETRY_DELAY_MS))
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: StatusCode) -> FetchErrorKind {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FetchErrorKind::Transient,
        s if s.is_server_error() => FetchErrorKind::Transient,
        _ => FetchErrorKind::Permanent,
    }
}

/// Classify a transport error from reqwest.
pub fn classify_error(error: &reqwest::Error) -> FetchErrorKind {
    if let Some(status) = error.status() {
        return classify_status(status);
    }
    if error.is_builder() || error.is_redirect() {
        return FetchErrorKind::Permanent;
    }
    // Connection errors, timeouts, truncated bodies, etc.
    FetchErrorKind::Transient
}

/// Wrap a reqwest error as a [`FetchError`] for `url`.
pub fn fetch_error(url: &str, error: &reqwest::Error) -> FetchError {
    FetchError {
        kind: classify_error(error),
        url: url.to_string(),
        message: error.to_string(),
    }
}
