pub mod cache;
pub mod commands;
pub mod error;
pub mod fetch;
pub mod http;
pub mod installer;
pub mod manifest;
pub mod pipeline;
pub mod receipt;
pub mod resolve;
pub mod runtime;
pub mod verify;

/// Test utilities for building manifests and fixtures.
#[cfg(test)]
pub mod test_utils {
    use crate::manifest::PackageManifest;
    use crate::runtime::MockRuntime;
    use serde_json::{Value, json};
    use sha2::{Digest, Sha256};
    use std::path::PathBuf;

    /// Checksum published for the swaggerific 0.0.4 x86_64 build.
    pub const SWAGGERIFIC_SHA256: &str =
        "261772c84e8326f36a238b62e482f832c8ae26513aa3c449bb05c0b73ba79671";

    /// Hex-encoded SHA-256 of `bytes`.
    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// A `{ algorithm, digest }` integrity value for sha256.
    pub fn sha256_integrity(digest: &str) -> Value {
        json!({ "algorithm": "sha256", "digest": digest })
    }

    /// A single variant entry. `platform` of `None` means all platforms.
    pub fn variant(
        version: &str,
        integrity: Value,
        url: &str,
        platform: Option<(&str, &str)>,
    ) -> Value {
        let mut v = json!({
            "version": version,
            "integrity": integrity,
            "downloadURL": url,
        });
        if let Some((os, arch)) = platform {
            v["platform"] = json!({ "os": os, "arch": arch });
        }
        v
    }

    /// Manifest JSON named `name` with the given variants.
    pub fn manifest_json(name: &str, variants: Vec<Value>) -> String {
        json!({
            "name": name,
            "displayName": "Swaggerific",
            "description": "Simple GUI app for working with Swagger/OpenAPI",
            "homepage": "https://github.com/ozkanpakdil/swaggerific",
            "app": "swaggerific.app",
            "variants": variants,
        })
        .to_string()
    }

    /// Parse a manifest built by [`manifest_json`], panicking on invalid input.
    pub fn manifest(name: &str, variants: Vec<Value>) -> PackageManifest {
        PackageManifest::from_json(&manifest_json(name, variants)).unwrap()
    }

    /// The swaggerific cask with its single x86_64 darwin variant.
    pub fn swaggerific() -> PackageManifest {
        manifest(
            "swaggerific",
            vec![variant(
                "0.0.4",
                sha256_integrity(SWAGGERIFIC_SHA256),
                "https://github.com/ozkanpakdil/swaggerific/releases/download/latest_macos/swaggerific_x86_64-darwin.tar.gz",
                Some(("darwin", "x86_64")),
            )],
        )
    }

    /// Returns a test home directory path based on the platform.
    pub fn test_home() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/home/user")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\Users\user")
        }
    }

    /// Configure a mock runtime with common defaults for tests.
    /// - home dir set to [`test_home`]
    /// - CASKR_RETRIES and CASKR_RETRY_DELAY_MS absent
    pub fn configure_mock_runtime_basics(runtime: &mut MockRuntime) {
        runtime.expect_home_dir().returning(|| Some(test_home()));
        runtime
            .expect_env_var()
            .returning(|_| Err(std::env::VarError::NotPresent));
    }
}
