//! The boundary where verified artifacts leave the pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::manifest::{PackageManifest, VersionSpec};
use crate::receipt::{Receipt, ReceiptStore};
use crate::runtime::Runtime;
use crate::verify::VerifiedArtifact;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Directory applications are staged into.
    pub appdir: PathBuf,
    /// Recorded in the receipt; the installer never strips quarantine itself.
    pub quarantine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    pub version: VersionSpec,
    pub location: PathBuf,
    pub unverified: bool,
}

/// Receives artifacts that passed verification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(
        &self,
        manifest: &PackageManifest,
        artifact: VerifiedArtifact,
        options: &InstallOptions,
    ) -> Result<InstallReport>;
}

/// Copies artifacts to `<appdir>/<name>/<version>/<file>` and records a
/// receipt.
pub struct AppDirInstaller<R: Runtime> {
    runtime: R,
    receipts: ReceiptStore,
}

impl<R: Runtime> AppDirInstaller<R> {
    pub fn new(runtime: R, receipts: ReceiptStore) -> Self {
        Self { runtime, receipts }
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }
}

#[async_trait]
impl<R: Runtime> Installer for AppDirInstaller<R> {
    #[tracing::instrument(skip(self, manifest, artifact, options), fields(name = manifest.name()))]
    async fn install(
        &self,
        manifest: &PackageManifest,
        artifact: VerifiedArtifact,
        options: &InstallOptions,
    ) -> Result<InstallReport> {
        let variant = artifact.variant();
        let target_dir = options
            .appdir
            .join(manifest.name())
            .join(variant.version.to_string());
        let dest = target_dir.join(artifact.file_name());

        if artifact.is_unverified() {
            warn!(
                "Installing {} {} without integrity verification",
                manifest.name(),
                variant.version
            );
        }

        self.runtime
            .create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {:?}", target_dir))?;
        self.runtime
            .copy(artifact.path(), &dest)
            .with_context(|| format!("Failed to stage {} into {:?}", artifact.file_name(), dest))?;
        info!("Staged {} into {:?}", artifact.file_name(), dest);

        let receipt = Receipt {
            name: manifest.name().to_string(),
            version: variant.version.clone(),
            integrity: variant.integrity.clone(),
            download_url: variant.download_url.clone(),
            location: dest.clone(),
            unverified: artifact.is_unverified(),
            quarantine: options.quarantine,
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            shipped: Vec::new(),
        };
        self.receipts
            .save(&self.runtime, &receipt)
            .context("Failed to write install receipt")?;

        Ok(InstallReport {
            name: receipt.name,
            version: receipt.version,
            location: dest,
            unverified: receipt.unverified,
        })
    }
}
