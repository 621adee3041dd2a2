//! Selecting the one variant of a manifest that applies to a platform.

use log::debug;

use crate::error::{CaskError, PolicyError};
use crate::manifest::{ArtifactVariant, Integrity, PackageManifest, Platform, VersionSpec};

/// Select the variant of `manifest` for `platform`.
///
/// When several variants carry identical constraints they are revisions of
/// the same entry and the last declared one wins. The returned variant has
/// its download URL expanded for `platform`.
///
/// Fails with [`CaskError::NotFound`] when no variant matches, and with
/// [`CaskError::Policy`] when the selected revision drops a checksum that an
/// earlier revision of the same version declared.
#[tracing::instrument(skip(manifest), fields(name = manifest.name()))]
pub fn resolve(manifest: &PackageManifest, platform: &Platform) -> Result<ArtifactVariant, CaskError> {
    platform.validate()?;

    let (index, selected) = manifest
        .variants()
        .iter()
        .enumerate()
        .rev()
        .find(|(_, v)| v.platform.matches(platform))
        .ok_or_else(|| CaskError::NotFound {
            name: manifest.name().to_string(),
            platform: platform.clone(),
        })?;

    check_revision_downgrade(manifest, index, selected)?;

    debug!(
        "Resolved {} for {} to variant #{} ({} {})",
        manifest.name(),
        platform,
        index,
        selected.version,
        selected.platform
    );
    Ok(selected.expand_for(platform))
}

/// A `skip` revision may not replace an earlier fixed-checksum revision of
/// the same pinned version.
fn check_revision_downgrade(
    manifest: &PackageManifest,
    index: usize,
    selected: &ArtifactVariant,
) -> Result<(), PolicyError> {
    let VersionSpec::Pinned(version) = &selected.version else {
        return Ok(());
    };
    if !selected.integrity.is_skip() {
        return Ok(());
    }

    let shipped = manifest.variants()[..index].iter().find_map(|earlier| {
        match &earlier.integrity {
            Integrity::Fixed { algorithm, .. }
                if earlier.platform == selected.platform && earlier.version == selected.version =>
            {
                Some(*algorithm)
            }
            _ => None,
        }
    });

    match shipped {
        Some(algorithm) => Err(PolicyError::IntegrityDowngrade {
            name: manifest.name().to_string(),
            version: version.clone(),
            algorithm,
        }),
        None => Ok(()),
    }
}
