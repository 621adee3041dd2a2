use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CaskError;

/// The operating system and CPU architecture an artifact is installed on.
///
/// Only built through [`Platform::new`] or [`Platform::detect`], so the names
/// are always normalised.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    /// Build a platform from user input, normalising aliases.
    ///
    /// Both parts are required; an empty OS or architecture is rejected.
    pub fn new(os: &str, arch: &str) -> Result<Self, CaskError> {
        let platform = Self {
            os: normalize_os(os),
            arch: normalize_arch(arch),
        };
        platform.validate()?;
        Ok(platform)
    }

    /// Detect the current platform
    pub fn detect() -> Self {
        Self {
            os: normalize_os(std::env::consts::OS),
            arch: normalize_arch(std::env::consts::ARCH),
        }
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub(crate) fn validate(&self) -> Result<(), CaskError> {
        if self.os.trim().is_empty() || self.arch.trim().is_empty() {
            return Err(CaskError::InvalidPlatform {
                os: self.os.clone(),
                arch: self.arch.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Canonical OS name. macOS is spelled `darwin`.
pub fn normalize_os(os: &str) -> String {
    let os = os.trim().to_lowercase();
    match os.as_str() {
        "macos" | "osx" | "mac" => "darwin".to_string(),
        _ => os,
    }
}

/// Canonical architecture name. 64-bit ARM is spelled `arm64`.
pub fn normalize_arch(arch: &str) -> String {
    let arch = arch.trim().to_lowercase();
    match arch.as_str() {
        "aarch64" => "arm64".to_string(),
        "amd64" | "x64" => "x86_64".to_string(),
        "i386" | "x86" => "i686".to_string(),
        _ => arch,
    }
}

/// Predicate over a [`Platform`]. A missing field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl PlatformConstraint {
    /// A constraint that matches every platform.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(os: Option<&str>, arch: Option<&str>) -> Self {
        Self {
            os: os.map(normalize_os).filter(|s| !s.is_empty()),
            arch: arch.map(normalize_arch).filter(|s| !s.is_empty()),
        }
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        self.os.as_ref().is_none_or(|os| *os == platform.os)
            && self.arch.as_ref().is_none_or(|arch| *arch == platform.arch)
    }

    /// Whether some platform satisfies both constraints.
    pub fn overlaps(&self, other: &Self) -> bool {
        fn field_overlaps(a: &Option<String>, b: &Option<String>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        field_overlaps(&self.os, &other.os) && field_overlaps(&self.arch, &other.arch)
    }
}

impl fmt::Display for PlatformConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.os, &self.arch) {
            (None, None) => write!(f, "any platform"),
            (os, arch) => write!(
                f,
                "{}/{}",
                os.as_deref().unwrap_or("*"),
                arch.as_deref().unwrap_or("*")
            ),
        }
    }
}
