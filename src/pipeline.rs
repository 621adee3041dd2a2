//! One install attempt: resolve, fetch, verify, hand off.
//!
//! An [`InstallAttempt`] moves through [`AttemptState`] exactly once. Every
//! failure lands in a terminal state and the attempt cannot be reused.

use log::{debug, info};
use std::fmt;
use std::sync::Arc;

use crate::cache::DownloadCache;
use crate::error::CaskError;
use crate::fetch::Fetcher;
use crate::installer::{InstallOptions, InstallReport, Installer};
use crate::manifest::{PackageManifest, Platform};
use crate::receipt::Receipt;
use crate::resolve::resolve;
use crate::verify::{self, VerifiedArtifact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    Unresolved,
    Resolved,
    Downloaded,
    Verified,
    HandedOff,
    NotFound,
    PolicyViolated,
    FetchFailed,
    IntegrityFailed,
}

impl AttemptState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Unresolved, Resolved)
                | (Unresolved, NotFound)
                | (Unresolved, PolicyViolated)
                | (Resolved, Downloaded)
                | (Resolved, FetchFailed)
                | (Downloaded, Verified)
                | (Downloaded, IntegrityFailed)
                | (Verified, HandedOff)
        )
    }

    pub fn is_terminal(self) -> bool {
        use AttemptState::*;
        matches!(
            self,
            HandedOff | NotFound | PolicyViolated | FetchFailed | IntegrityFailed
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::Unresolved => "unresolved",
            AttemptState::Resolved => "resolved",
            AttemptState::Downloaded => "downloaded",
            AttemptState::Verified => "verified",
            AttemptState::HandedOff => "handed off",
            AttemptState::NotFound => "not found",
            AttemptState::PolicyViolated => "policy violated",
            AttemptState::FetchFailed => "fetch failed",
            AttemptState::IntegrityFailed => "integrity failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
pub struct InstallAttempt {
    state: AttemptState,
}

impl Default for InstallAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallAttempt {
    pub fn new() -> Self {
        Self {
            state: AttemptState::Unresolved,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), CaskError> {
        if !self.state.can_advance_to(next) {
            return Err(CaskError::StaleAttempt(self.state));
        }
        debug!("Install attempt {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, next: AttemptState, err: CaskError) -> CaskError {
        match self.advance(next) {
            Ok(()) => err,
            Err(stale) => stale,
        }
    }
}

/// Drives attempts through resolve, fetch and verify.
pub struct Pipeline<F: Fetcher> {
    fetcher: F,
    cache: Option<Arc<DownloadCache>>,
}

impl<F: Fetcher> Pipeline<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cache: None,
        }
    }

    /// Route fetches through a shared download cache.
    pub fn with_cache(mut self, cache: Arc<DownloadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Resolve, fetch and verify `manifest` for `platform`.
    ///
    /// `shipped` is the receipt of a previous install, if any. A variant that
    /// would drop the checksum it recorded is refused.
    #[tracing::instrument(skip(self, attempt, manifest, shipped), fields(name = manifest.name()))]
    pub async fn prepare(
        &self,
        attempt: &mut InstallAttempt,
        manifest: &PackageManifest,
        platform: &Platform,
        shipped: Option<&Receipt>,
    ) -> Result<VerifiedArtifact, CaskError> {
        if attempt.state() != AttemptState::Unresolved {
            return Err(CaskError::StaleAttempt(attempt.state()));
        }

        let variant = match resolve(manifest, platform) {
            Ok(variant) => variant,
            Err(err @ CaskError::Policy(_)) => {
                return Err(attempt.fail(AttemptState::PolicyViolated, err));
            }
            Err(err) => return Err(attempt.fail(AttemptState::NotFound, err)),
        };
        if let Some(receipt) = shipped {
            if let Err(err) = receipt.guard_downgrade(&variant) {
                return Err(attempt.fail(AttemptState::PolicyViolated, err.into()));
            }
        }
        attempt.advance(AttemptState::Resolved)?;
        info!("Resolved {} {} -> {}", manifest.name(), variant.version, variant.download_url);

        if let Some(cache) = &self.cache {
            return match cache.get_or_fetch(&self.fetcher, &variant).await {
                Ok(artifact) => {
                    attempt.advance(AttemptState::Downloaded)?;
                    attempt.advance(AttemptState::Verified)?;
                    Ok(artifact)
                }
                Err(err @ CaskError::Integrity(_)) => {
                    attempt.advance(AttemptState::Downloaded)?;
                    Err(attempt.fail(AttemptState::IntegrityFailed, err))
                }
                Err(err) => Err(attempt.fail(AttemptState::FetchFailed, err)),
            };
        }

        let local = match self.fetcher.fetch(&variant).await {
            Ok(local) => local,
            Err(err) => return Err(attempt.fail(AttemptState::FetchFailed, err.into())),
        };
        attempt.advance(AttemptState::Downloaded)?;

        match verify::verify(local, &variant) {
            Ok(artifact) => {
                attempt.advance(AttemptState::Verified)?;
                Ok(artifact)
            }
            Err(err) => Err(attempt.fail(AttemptState::IntegrityFailed, err.into())),
        }
    }
}

/// Hand a verified artifact to the installer, completing the attempt.
pub async fn hand_off<I: Installer + ?Sized>(
    attempt: &mut InstallAttempt,
    manifest: &PackageManifest,
    artifact: VerifiedArtifact,
    installer: &I,
    options: &InstallOptions,
) -> anyhow::Result<InstallReport> {
    attempt.advance(AttemptState::HandedOff)?;
    installer.install(manifest, artifact, options).await
}
