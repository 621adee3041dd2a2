use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms a manifest may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Length of a hex-encoded digest for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(format!(
                "unsupported digest algorithm '{}'; expected sha256 or sha512",
                other
            )),
        }
    }
}

/// How a variant's artifact is checked after download.
///
/// `Skip` is an explicit opt-out; artifacts fetched under it are flagged as
/// unverified all the way to the installer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IntegrityRepr", into = "IntegrityRepr")]
pub enum Integrity {
    Fixed {
        algorithm: DigestAlgorithm,
        digest: String,
    },
    Skip,
}

impl Integrity {
    /// A fixed checksum, validated for length and hex alphabet.
    pub fn fixed(algorithm: DigestAlgorithm, digest: &str) -> Result<Self, String> {
        let digest = digest.trim().to_lowercase();
        if digest.len() != algorithm.hex_len() {
            return Err(format!(
                "{} digest must be {} hex characters, got {}",
                algorithm,
                algorithm.hex_len(),
                digest.len()
            ));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("{} digest contains non-hex characters", algorithm));
        }
        Ok(Integrity::Fixed { algorithm, digest })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Integrity::Skip)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integrity::Fixed { algorithm, digest } => write!(f, "{}:{}", algorithm, digest),
            Integrity::Skip => write!(f, "skip"),
        }
    }
}

/// On-disk shape: either the keyword `"skip"` or `{ algorithm, digest }`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IntegrityRepr {
    Keyword(String),
    Fixed { algorithm: String, digest: String },
}

impl TryFrom<IntegrityRepr> for Integrity {
    type Error = String;

    fn try_from(repr: IntegrityRepr) -> Result<Self, Self::Error> {
        match repr {
            IntegrityRepr::Keyword(k) if k.eq_ignore_ascii_case("skip") => Ok(Integrity::Skip),
            IntegrityRepr::Keyword(k) => Err(format!(
                "integrity must be \"skip\" or {{ algorithm, digest }}, got \"{}\"",
                k
            )),
            IntegrityRepr::Fixed { algorithm, digest } => {
                Integrity::fixed(algorithm.parse()?, &digest)
            }
        }
    }
}

impl From<Integrity> for IntegrityRepr {
    fn from(integrity: Integrity) -> Self {
        match integrity {
            Integrity::Fixed { algorithm, digest } => IntegrityRepr::Fixed {
                algorithm: algorithm.to_string(),
                digest,
            },
            Integrity::Skip => IntegrityRepr::Keyword("skip".to_string()),
        }
    }
}
