use log::debug;
use std::path::{Path, PathBuf};

use super::PackageManifest;
use crate::error::ManifestError;
use crate::runtime::Runtime;

const MANIFEST_EXTENSION: &str = "json";

/// A directory of `<name>.json` cask manifests.
pub struct ManifestStore<'a, R: Runtime> {
    runtime: &'a R,
    dir: PathBuf,
}

impl<'a, R: Runtime> ManifestStore<'a, R> {
    pub fn new(runtime: &'a R, dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, MANIFEST_EXTENSION))
    }

    /// Sorted names of all manifests in the directory.
    #[tracing::instrument(skip(self))]
    pub fn names(&self) -> Result<Vec<String>, ManifestError> {
        if !self.runtime.exists(&self.dir) {
            debug!("Casks directory {:?} does not exist", self.dir);
            return Ok(Vec::new());
        }

        let entries = self
            .runtime
            .read_dir(&self.dir)
            .map_err(|e| ManifestError::Read {
                path: self.dir.clone(),
                message: format!("{:#}", e),
            })?;

        let mut names: Vec<String> = entries
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == MANIFEST_EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load the manifest for `name`, checking it declares that name.
    #[tracing::instrument(skip(self))]
    pub fn load(&self, name: &str) -> Result<PackageManifest, ManifestError> {
        let path = self.path_for(name);
        if !self.runtime.exists(&path) {
            return Err(ManifestError::Missing {
                name: name.to_string(),
                dir: self.dir.clone(),
            });
        }

        let manifest = PackageManifest::load(self.runtime, &path)?;
        if manifest.name() != name {
            return Err(ManifestError::invalid(
                name,
                format!(
                    "file {} declares name '{}'",
                    path.display(),
                    manifest.name()
                ),
            ));
        }
        Ok(manifest)
    }

    /// Load every manifest, keeping per-file failures.
    pub fn load_all(&self) -> Result<Vec<(String, Result<PackageManifest, ManifestError>)>, ManifestError> {
        Ok(self
            .names()?
            .into_iter()
            .map(|name| {
                let result = self.load(&name);
                (name, result)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::test_utils::{manifest_json, sha256_integrity, variant};
    use mockall::predicate::eq;

    fn casks_dir() -> PathBuf {
        PathBuf::from("/casks")
    }

    fn tool_json(name: &str) -> String {
        manifest_json(
            name,
            vec![variant(
                "1.0.0",
                sha256_integrity(&"c".repeat(64)),
                "https://example.com/tool.tar.gz",
                None,
            )],
        )
    }

    #[test]
    fn test_names_sorted_and_filtered() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime.expect_read_dir().returning(|dir| {
            Ok(vec![
                dir.join("zeta.json"),
                dir.join("README.md"),
                dir.join("alpha.json"),
            ])
        });

        let store = ManifestStore::new(&runtime, casks_dir());
        assert_eq!(store.names().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_names_missing_dir_is_empty() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let store = ManifestStore::new(&runtime, casks_dir());
        assert!(store.names().unwrap().is_empty());
    }

    #[test]
    fn test_load_by_name() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(casks_dir().join("tool.json")))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(tool_json("tool")));

        let store = ManifestStore::new(&runtime, casks_dir());
        let manifest = store.load("tool").unwrap();
        assert_eq!(manifest.name(), "tool");
    }

    #[test]
    fn test_load_missing() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let store = ManifestStore::new(&runtime, casks_dir());
        assert!(matches!(
            store.load("nope"),
            Err(ManifestError::Missing { .. })
        ));
    }

    #[test]
    fn test_load_rejects_name_mismatch() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(tool_json("other")));

        let store = ManifestStore::new(&runtime, casks_dir());
        let err = store.load("tool").unwrap_err();
        assert!(err.to_string().contains("declares name 'other'"));
    }

    #[test]
    fn test_load_all_keeps_failures() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_dir()
            .returning(|dir| Ok(vec![dir.join("good.json"), dir.join("bad.json")]));
        runtime.expect_read_to_string().returning(|path| {
            if path.ends_with("good.json") {
                Ok(tool_json("good"))
            } else {
                Ok("{ not json".to_string())
            }
        });

        let store = ManifestStore::new(&runtime, casks_dir());
        let results = store.load_all().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "bad");
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());
    }
}
