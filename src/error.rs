//! Error taxonomy for loading, resolving, fetching and verifying casks.
//!
//! Core errors are plain values (`Clone`) so a shared download cache can hand
//! the same failure to every caller waiting on one fetch.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::{DigestAlgorithm, Platform};
use crate::pipeline::AttemptState;

/// Whether a fetch failure may succeed if tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Connection problems, timeouts, server errors, rate limiting.
    Transient,
    /// Client errors, bad URLs, empty bodies, local I/O failures.
    Permanent,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transient => write!(f, "transient"),
            FetchErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A failed download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} fetch failure for {url}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn transient(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn permanent(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

/// The downloaded bytes do not match the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("{algorithm} checksum mismatch: expected {expected}, got {actual}")]
    Mismatch {
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("downloaded artifact is empty")]
    Empty,

    #[error("could not read downloaded artifact: {0}")]
    Unreadable(String),
}

/// A manifest or install history that would weaken integrity guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error(
        "{name} {version} shipped with a {algorithm} checksum but the selected variant skips verification"
    )]
    IntegrityDowngrade {
        name: String,
        version: String,
        algorithm: DigestAlgorithm,
    },
}

/// Errors surfaced by the resolve/fetch/verify pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaskError {
    #[error("unsupported platform: {name} has no variant for {platform}")]
    NotFound { name: String, platform: Platform },

    #[error("platform must specify both OS and architecture (got os={os:?}, arch={arch:?})")]
    InvalidPlatform { os: String, arch: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("install attempt is already {0}; start a fresh attempt")]
    StaleAttempt(AttemptState),
}

/// Errors raised while loading and validating manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cask '{name}' not found in {}", dir.display())]
    Missing { name: String, dir: PathBuf },

    #[error("failed to read manifest {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid manifest {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error(
        "manifest {name}: variants #{first} ({first_constraint}) and #{second} ({second_constraint}) overlap without being identical"
    )]
    AmbiguousPlatform {
        name: String,
        first: usize,
        first_constraint: String,
        second: usize,
        second_constraint: String,
    },
}

impl ManifestError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ManifestError::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
