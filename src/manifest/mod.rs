//! Cask manifests: the typed schema and its load-time validation.
//!
//! A manifest is parsed from JSON into loosely typed raw structs, then
//! validated into a [`PackageManifest`]. Once built, a manifest is never
//! mutated; the resolver only reads it.

mod integrity;
mod platform;
mod store;
pub mod template;

use log::debug;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ManifestError;
use crate::runtime::Runtime;

pub use integrity::{DigestAlgorithm, Integrity};
pub use platform::{Platform, PlatformConstraint, normalize_arch, normalize_os};
pub use store::ManifestStore;

/// Which version a variant installs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionSpec {
    Pinned(String),
    /// Whatever the download URL serves at install time.
    Latest,
}

impl VersionSpec {
    pub fn is_latest(&self) -> bool {
        matches!(self, VersionSpec::Latest)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Pinned(v) => write!(f, "{}", v),
            VersionSpec::Latest => write!(f, "latest"),
        }
    }
}

impl TryFrom<String> for VersionSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("latest") {
            return Ok(VersionSpec::Latest);
        }
        if value.is_empty() {
            return Err("version must not be empty".to_string());
        }
        if value.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
            return Err(format!("version '{}' contains invalid characters", value));
        }
        Ok(VersionSpec::Pinned(value.to_string()))
    }
}

impl From<VersionSpec> for String {
    fn from(version: VersionSpec) -> Self {
        version.to_string()
    }
}

/// One installable build of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVariant {
    pub version: VersionSpec,
    pub integrity: Integrity,
    /// Literal after resolution; may contain placeholders inside a manifest.
    pub download_url: String,
    pub platform: PlatformConstraint,
    pub post_install_notes: Option<String>,
}

impl ArtifactVariant {
    /// Copy of this variant with its download URL expanded for `platform`.
    pub fn expand_for(&self, platform: &Platform) -> Self {
        Self {
            download_url: template::expand(&self.download_url, &self.version, platform),
            ..self.clone()
        }
    }
}

/// A validated cask manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    name: String,
    display_name: String,
    description: String,
    homepage: String,
    app: Option<String>,
    verified: Option<String>,
    variants: Vec<ArtifactVariant>,
}

impl PackageManifest {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// Bundle name inside the artifact, passed through to the installer.
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// URL prefix every download URL is checked against.
    pub fn verified(&self) -> Option<&str> {
        self.verified.as_deref()
    }

    /// Variants in declaration order.
    pub fn variants(&self) -> &[ArtifactVariant] {
        &self.variants
    }

    /// Parse and validate a manifest from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(content)?;
        raw.validate()
    }

    /// Load a manifest file through the runtime.
    #[tracing::instrument(skip(runtime, path))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self, ManifestError> {
        debug!("Loading manifest from {:?}", path);
        let content = runtime
            .read_to_string(path)
            .map_err(|e| ManifestError::Read {
                path: path.to_path_buf(),
                message: format!("{:#}", e),
            })?;
        Self::from_json(&content)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawManifest {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    homepage: String,
    app: Option<String>,
    verified: Option<String>,
    variants: Vec<RawVariant>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawVariant {
    version: VersionSpec,
    integrity: Integrity,
    #[serde(rename = "downloadURL")]
    download_url: String,
    platform: Option<RawConstraint>,
    post_install_notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConstraint {
    os: Option<String>,
    arch: Option<String>,
}

impl RawManifest {
    fn validate(self) -> Result<PackageManifest, ManifestError> {
        let name = self.name.trim().to_string();
        validate_name(&name)?;

        if self.variants.is_empty() {
            return Err(ManifestError::invalid(&name, "no variants declared"));
        }

        if !self.homepage.is_empty() {
            Url::parse(&self.homepage).map_err(|e| {
                ManifestError::invalid(&name, format!("homepage '{}': {}", self.homepage, e))
            })?;
        }

        let verified = self
            .verified
            .map(|v| strip_scheme(v.trim()).to_string())
            .filter(|v| !v.is_empty());
        if let Some(prefix) = &verified {
            if prefix.contains(['{', '}']) {
                return Err(ManifestError::invalid(
                    &name,
                    format!("verified prefix '{}' must not contain placeholders", prefix),
                ));
            }
        }

        let variants = self
            .variants
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.validate(&name, index, verified.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        check_constraints(&name, &variants)?;

        Ok(PackageManifest {
            display_name: self
                .display_name
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| name.clone()),
            name,
            description: self.description,
            homepage: self.homepage,
            app: self.app.filter(|a| !a.trim().is_empty()),
            verified,
            variants,
        })
    }
}

impl RawVariant {
    fn validate(
        self,
        name: &str,
        index: usize,
        verified: Option<&str>,
    ) -> Result<ArtifactVariant, ManifestError> {
        let invalid = |reason: String| {
            ManifestError::invalid(name, format!("variant #{}: {}", index, reason))
        };

        let download_url = self.download_url.trim().to_string();
        let names = template::placeholders(&download_url).map_err(invalid)?;
        if let Some(unknown) = names.iter().find(|n| !template::PLACEHOLDERS.contains(n)) {
            return Err(invalid(format!("unknown URL placeholder '{{{}}}'", unknown)));
        }
        if self.version.is_latest() && names.contains(&"version") {
            return Err(invalid(
                "'{version}' cannot be used with version \"latest\"".to_string(),
            ));
        }

        let platform = match self.platform {
            Some(c) => PlatformConstraint::new(c.os.as_deref(), c.arch.as_deref()),
            None => PlatformConstraint::any(),
        };

        // Check a representative expansion parses as an absolute URL.
        let sample = Platform::new(
            platform.os.as_deref().unwrap_or("darwin"),
            platform.arch.as_deref().unwrap_or("arm64"),
        )
        .map_err(|e| invalid(e.to_string()))?;
        let expanded = template::expand(&download_url, &self.version, &sample);
        let url = Url::parse(&expanded)
            .map_err(|e| invalid(format!("download URL '{}': {}", download_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "download URL '{}' must use http or https",
                download_url
            )));
        }

        // {os} and {arch} vary per platform, so they must not fall inside the
        // verified prefix. Only {version} is known at this point.
        if let Some(prefix) = verified {
            let pinned = match &self.version {
                VersionSpec::Pinned(v) => download_url.replace("{version}", v),
                VersionSpec::Latest => download_url.clone(),
            };
            if !strip_scheme(&pinned).starts_with(prefix) {
                return Err(invalid(format!(
                    "download URL '{}' is not under verified prefix '{}'",
                    download_url, prefix
                )));
            }
        }

        Ok(ArtifactVariant {
            version: self.version,
            integrity: self.integrity,
            download_url,
            platform,
            post_install_notes: self.post_install_notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

fn validate_name(name: &str) -> Result<(), ManifestError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ManifestError::invalid(
            name,
            "name must be lowercase letters, digits, '.', '_' or '-'",
        ))
    }
}

/// Identical constraints are revisions of one variant; partial overlaps are
/// ambiguous and rejected.
fn check_constraints(name: &str, variants: &[ArtifactVariant]) -> Result<(), ManifestError> {
    for (i, a) in variants.iter().enumerate() {
        for (j, b) in variants.iter().enumerate().skip(i + 1) {
            if a.platform != b.platform && a.platform.overlaps(&b.platform) {
                return Err(ManifestError::AmbiguousPlatform {
                    name: name.to_string(),
                    first: i,
                    first_constraint: a.platform.to_string(),
                    second: j,
                    second_constraint: b.platform.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}
