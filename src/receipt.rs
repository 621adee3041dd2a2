//! Install receipts: what was installed, and with which integrity.
//!
//! A receipt is the record that a checksum "has shipped" for a version, so a
//! later manifest revision that drops the checksum can be refused. Each save
//! carries forward the checksums of earlier receipts for the same cask, so
//! installing a different version does not forget them.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PolicyError;
use crate::manifest::{ArtifactVariant, DigestAlgorithm, Integrity, VersionSpec};
use crate::runtime::Runtime;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Receipt {
    pub name: String,
    pub version: VersionSpec,
    pub integrity: Integrity,
    pub download_url: String,
    pub location: PathBuf,
    pub unverified: bool,
    pub quarantine: bool,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
    /// Pinned versions installed earlier with a checksum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shipped: Vec<ShippedChecksum>,
}

/// A pinned version that was once installed with a checksum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShippedChecksum {
    pub version: String,
    pub algorithm: DigestAlgorithm,
}

impl Receipt {
    /// Every pinned version known to have shipped with a checksum: the
    /// history plus this receipt's own install.
    pub fn shipped_checksums(&self) -> Vec<ShippedChecksum> {
        let mut all = self.shipped.clone();
        if let (VersionSpec::Pinned(version), Integrity::Fixed { algorithm, .. }) =
            (&self.version, &self.integrity)
        {
            let current = ShippedChecksum {
                version: version.clone(),
                algorithm: *algorithm,
            };
            if !all.contains(&current) {
                all.push(current);
            }
        }
        all
    }

    /// Refuse `variant` if it skips verification for a pinned version that
    /// any recorded install shipped with a checksum.
    pub fn guard_downgrade(&self, variant: &ArtifactVariant) -> Result<(), PolicyError> {
        let VersionSpec::Pinned(version) = &variant.version else {
            return Ok(());
        };
        if !variant.integrity.is_skip() {
            return Ok(());
        }
        match self
            .shipped_checksums()
            .into_iter()
            .find(|shipped| &shipped.version == version)
        {
            Some(shipped) => Err(PolicyError::IntegrityDowngrade {
                name: self.name.clone(),
                version: version.clone(),
                algorithm: shipped.algorithm,
            }),
            None => Ok(()),
        }
    }
}

/// Receipts stored as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    #[tracing::instrument(skip(self, runtime))]
    pub fn load<R: Runtime>(&self, runtime: &R, name: &str) -> Result<Option<Receipt>> {
        let path = self.path_for(name);
        if !runtime.exists(&path) {
            debug!("No receipt for {} at {:?}", name, path);
            return Ok(None);
        }
        let content = runtime.read_to_string(&path)?;
        let receipt = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse receipt {:?}", path))?;
        Ok(Some(receipt))
    }

    /// Write `receipt`, keeping the shipped checksums of the one it replaces.
    #[tracing::instrument(skip(self, runtime, receipt), fields(name = %receipt.name))]
    pub fn save<R: Runtime>(&self, runtime: &R, receipt: &Receipt) -> Result<()> {
        let mut receipt = receipt.clone();
        if let Some(previous) = self.load(runtime, &receipt.name)? {
            for shipped in previous.shipped_checksums() {
                if !receipt.shipped.contains(&shipped) {
                    receipt.shipped.push(shipped);
                }
            }
        }

        runtime.create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(&receipt)?;
        runtime.write(&self.path_for(&receipt.name), content.as_bytes())?;
        debug!("Saved receipt for {} {}", receipt.name, receipt.version);
        Ok(())
    }
}
