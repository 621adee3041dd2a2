//! Integrity verification of downloaded artifacts.
//!
//! Nothing reaches the installer without passing through [`verify`]. A
//! variant that opts out of checksums still produces a [`VerifiedArtifact`],
//! but one flagged as unverified so callers can tell the two cases apart.

use log::{debug, warn};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use crate::error::IntegrityError;
use crate::fetch::LocalArtifact;
use crate::manifest::{ArtifactVariant, DigestAlgorithm, Integrity};

/// Where a verified artifact's bytes live.
#[derive(Debug)]
pub enum ArtifactFile {
    /// Removed when the artifact is dropped.
    Temporary(TempPath),
    /// Owned by the download cache; left in place.
    Cached(PathBuf),
}

impl ArtifactFile {
    pub fn path(&self) -> &Path {
        match self {
            ArtifactFile::Temporary(path) => path,
            ArtifactFile::Cached(path) => path,
        }
    }
}

/// An artifact that is safe to hand to the installer.
#[derive(Debug)]
pub struct VerifiedArtifact {
    file: ArtifactFile,
    file_name: String,
    variant: ArtifactVariant,
    digest: Option<String>,
}

impl VerifiedArtifact {
    pub(crate) fn new(
        file: ArtifactFile,
        file_name: String,
        variant: ArtifactVariant,
        digest: Option<String>,
    ) -> Self {
        Self {
            file,
            file_name,
            variant,
            digest,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file(&self) -> &ArtifactFile {
        &self.file
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The resolved variant this artifact was fetched for.
    pub fn variant(&self) -> &ArtifactVariant {
        &self.variant
    }

    /// Hex digest that was checked, or `None` when verification was skipped.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// True when the manifest declared `integrity = skip`.
    pub fn is_unverified(&self) -> bool {
        self.variant.integrity.is_skip()
    }

    pub(crate) fn into_file(self) -> ArtifactFile {
        self.file
    }
}

/// Check a downloaded artifact against its variant's declared integrity.
///
/// On failure the local artifact is dropped, which removes its file.
#[tracing::instrument(skip(local, variant), fields(file = %local.file_name()))]
pub fn verify(
    local: LocalArtifact,
    variant: &ArtifactVariant,
) -> Result<VerifiedArtifact, IntegrityError> {
    let digest = check_file(local.path(), &variant.integrity)?;
    let (path, file_name) = local.into_parts();
    Ok(VerifiedArtifact::new(
        ArtifactFile::Temporary(path),
        file_name,
        variant.clone(),
        digest,
    ))
}

/// Check the file at `path` against `integrity`, returning the digest that
/// matched. `Skip` always succeeds with `None`.
pub fn check_file(path: &Path, integrity: &Integrity) -> Result<Option<String>, IntegrityError> {
    let (algorithm, expected) = match integrity {
        Integrity::Skip => {
            warn!(
                "Integrity verification skipped for {:?}; the artifact is unverified",
                path
            );
            return Ok(None);
        }
        Integrity::Fixed { algorithm, digest } => (*algorithm, digest),
    };

    let actual = compute_digest(path, algorithm)?;
    if actual != *expected {
        return Err(IntegrityError::Mismatch {
            algorithm,
            expected: expected.clone(),
            actual,
        });
    }

    debug!("{} checksum matched for {:?}", algorithm, path);
    Ok(Some(actual))
}

/// Hex digest of the file at `path`.
///
/// A zero-length file is an error regardless of the declared checksum.
pub fn compute_digest(path: &Path, algorithm: DigestAlgorithm) -> Result<String, IntegrityError> {
    let mut file = File::open(path).map_err(|e| IntegrityError::Unreadable(e.to_string()))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];
    let mut total: u64 = 0;

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| IntegrityError::Unreadable(e.to_string()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    if total == 0 {
        return Err(IntegrityError::Empty);
    }
    Ok(hasher.finalize_hex())
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PlatformConstraint, VersionSpec};
    use crate::test_utils::sha256_hex;
    use std::io::Write;

    const PAYLOAD: &[u8] = b"swaggerific.app bundle bytes";

    fn local_artifact(bytes: &[u8]) -> LocalArtifact {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        LocalArtifact::new(
            file.into_temp_path(),
            bytes.len() as u64,
            "swaggerific_x86_64-darwin.tar.gz",
        )
    }

    fn variant(integrity: Integrity) -> ArtifactVariant {
        ArtifactVariant {
            version: VersionSpec::Pinned("0.0.4".into()),
            integrity,
            download_url: "https://example.com/swaggerific_x86_64-darwin.tar.gz".into(),
            platform: PlatformConstraint::new(Some("darwin"), Some("x86_64")),
            post_install_notes: None,
        }
    }

    fn sha256_of(bytes: &[u8]) -> Integrity {
        Integrity::fixed(DigestAlgorithm::Sha256, &sha256_hex(bytes)).unwrap()
    }

    #[test]
    fn test_exact_bytes_verify() {
        let verified = verify(local_artifact(PAYLOAD), &variant(sha256_of(PAYLOAD))).unwrap();

        assert!(!verified.is_unverified());
        assert_eq!(verified.digest(), Some(sha256_hex(PAYLOAD).as_str()));
        assert_eq!(verified.file_name(), "swaggerific_x86_64-darwin.tar.gz");
        assert_eq!(std::fs::read(verified.path()).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_any_single_bit_flip_is_rejected() {
        let integrity = sha256_of(PAYLOAD);
        for byte in 0..PAYLOAD.len() {
            for bit in 0..8 {
                let mut corrupted = PAYLOAD.to_vec();
                corrupted[byte] ^= 1 << bit;

                let result = verify(local_artifact(&corrupted), &variant(integrity.clone()));
                assert!(
                    matches!(result, Err(IntegrityError::Mismatch { .. })),
                    "flipping bit {} of byte {} was not detected",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_truncated_download_is_rejected() {
        let result = verify(
            local_artifact(&PAYLOAD[..PAYLOAD.len() - 1]),
            &variant(sha256_of(PAYLOAD)),
        );
        assert!(matches!(result, Err(IntegrityError::Mismatch { .. })));
    }

    #[test]
    fn test_empty_download_is_rejected() {
        // Even when the manifest declares the digest of empty input.
        let result = verify(local_artifact(b""), &variant(sha256_of(b"")));
        assert_eq!(result.unwrap_err(), IntegrityError::Empty);
    }

    #[test]
    fn test_mismatch_discards_the_file() {
        let local = local_artifact(b"tampered");
        let path = local.path().to_path_buf();

        let result = verify(local, &variant(sha256_of(PAYLOAD)));
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_skip_always_succeeds_and_is_flagged() {
        for bytes in [PAYLOAD, b"anything else".as_slice()] {
            let verified = verify(local_artifact(bytes), &variant(Integrity::Skip)).unwrap();
            assert!(verified.is_unverified());
            assert_eq!(verified.digest(), None);
            assert_eq!(std::fs::read(verified.path()).unwrap(), bytes);
        }
    }

    #[test]
    fn test_sha512() {
        let digest = hex::encode(Sha512::digest(PAYLOAD));
        let integrity = Integrity::fixed(DigestAlgorithm::Sha512, &digest).unwrap();

        let verified = verify(local_artifact(PAYLOAD), &variant(integrity)).unwrap();
        assert_eq!(verified.digest(), Some(digest.as_str()));
    }

    #[test]
    fn test_verified_temp_file_removed_on_drop() {
        let verified = verify(local_artifact(PAYLOAD), &variant(sha256_of(PAYLOAD))).unwrap();
        let path = verified.path().to_path_buf();
        drop(verified);
        assert!(!path.exists());
    }

    #[test]
    fn test_compute_digest_missing_file() {
        let result = compute_digest(Path::new("/nonexistent/artifact"), DigestAlgorithm::Sha256);
        assert!(matches!(result, Err(IntegrityError::Unreadable(_))));
    }
}
