//! Shared download cache with single-flight fetching.
//!
//! Entries are keyed by `(download_url, integrity)`. While a fetch for a key
//! is in flight, later callers for the same key wait for its result instead
//! of downloading again. Failed results are evicted so a fresh attempt
//! starts over; successful artifacts are moved into the cache directory and
//! stay owned by the cache.

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{CaskError, FetchError};
use crate::fetch::{Fetcher, artifact_file_name};
use crate::manifest::{ArtifactVariant, Integrity};
use crate::runtime::Runtime;
use crate::verify::{self, ArtifactFile, VerifiedArtifact};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub download_url: String,
    pub integrity: Integrity,
}

impl CacheKey {
    pub fn for_variant(variant: &ArtifactVariant) -> Self {
        Self {
            download_url: variant.download_url.clone(),
            integrity: variant.integrity.clone(),
        }
    }
}

#[derive(Debug)]
struct CachedArtifact {
    path: PathBuf,
    file_name: String,
    digest: Option<String>,
}

type Slot = Arc<OnceCell<Result<Arc<CachedArtifact>, CaskError>>>;

pub struct DownloadCache {
    runtime: Arc<dyn Runtime>,
    dir: PathBuf,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl DownloadCache {
    pub fn new(runtime: Arc<dyn Runtime>, dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            dir: dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the artifact for `key` is stored.
    ///
    /// Checksummed artifacts are addressed by digest; unverified ones by a
    /// hash of their URL.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let bucket = match &key.integrity {
            Integrity::Fixed { algorithm, digest } => format!("{}-{}", algorithm, digest),
            Integrity::Skip => {
                let url_hash = hex::encode(Sha256::digest(key.download_url.as_bytes()));
                format!("unverified-{}", &url_hash[..16])
            }
        };
        self.dir
            .join(bucket)
            .join(artifact_file_name(&key.download_url))
    }

    /// Fetch and verify `variant`, or reuse the result of a fetch that is
    /// already cached or in flight for the same key.
    #[tracing::instrument(skip(self, fetcher, variant), fields(url = %variant.download_url))]
    pub async fn get_or_fetch<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        variant: &ArtifactVariant,
    ) -> Result<VerifiedArtifact, CaskError> {
        let key = CacheKey::for_variant(variant);
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key.clone()).or_default().clone()
        };

        let result = slot
            .get_or_init(|| self.populate(fetcher, variant, &key))
            .await
            .clone();

        match result {
            Ok(entry) => Ok(VerifiedArtifact::new(
                ArtifactFile::Cached(entry.path.clone()),
                entry.file_name.clone(),
                variant.clone(),
                entry.digest.clone(),
            )),
            Err(e) => {
                let mut slots = self.slots.lock().await;
                if slots.get(&key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    slots.remove(&key);
                }
                Err(e)
            }
        }
    }

    async fn populate<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        variant: &ArtifactVariant,
        key: &CacheKey,
    ) -> Result<Arc<CachedArtifact>, CaskError> {
        let dest = self.entry_path(key);
        let file_name = artifact_file_name(&variant.download_url);

        if let Some(digest) = self.reuse_from_disk(&dest, &variant.integrity) {
            info!("Using cached download {:?}", dest);
            return Ok(Arc::new(CachedArtifact {
                path: dest,
                file_name,
                digest: Some(digest),
            }));
        }

        let local = fetcher.fetch(variant).await?;
        let verified = verify::verify(local, variant)?;
        let digest = verified.digest().map(str::to_string);

        self.store(verified, &dest).map_err(|message| {
            CaskError::Fetch(FetchError::permanent(&variant.download_url, message))
        })?;
        debug!("Stored {:?} in cache", dest);

        Ok(Arc::new(CachedArtifact {
            path: dest,
            file_name,
            digest,
        }))
    }

    /// Checksummed artifacts left by an earlier run are re-verified and
    /// reused. Unverified artifacts are always downloaded again.
    fn reuse_from_disk(&self, dest: &Path, integrity: &Integrity) -> Option<String> {
        if integrity.is_skip() || !self.runtime.exists(dest) {
            return None;
        }
        match verify::check_file(dest, integrity) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Discarding cached {:?}: {}", dest, e);
                if let Err(e) = self.runtime.remove_file(dest) {
                    warn!("Failed to remove stale cache entry {:?}: {:#}", dest, e);
                }
                None
            }
        }
    }

    /// Move a verified temporary artifact to `dest`, copying when a rename
    /// is not possible (e.g. across filesystems).
    fn store(&self, verified: VerifiedArtifact, dest: &Path) -> Result<(), String> {
        if let Some(parent) = dest.parent() {
            self.runtime
                .create_dir_all(parent)
                .map_err(|e| format!("failed to create cache directory: {:#}", e))?;
        }

        let copy = |from: &Path| {
            self.runtime
                .copy(from, dest)
                .map(|_| ())
                .map_err(|e| format!("failed to store artifact: {:#}", e))
        };
        match verified.into_file() {
            ArtifactFile::Temporary(temp) => match temp.persist(dest) {
                Ok(()) => Ok(()),
                Err(e) => copy(&*e.path),
            },
            ArtifactFile::Cached(path) if path == dest => Ok(()),
            ArtifactFile::Cached(path) => copy(path.as_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchErrorKind, IntegrityError};
    use crate::fetch::{HttpFetcher, LocalArtifact, MockFetcher};
    use crate::http::{HttpClient, RetryPolicy};
    use crate::manifest::{DigestAlgorithm, PlatformConstraint, VersionSpec};
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::test_utils::sha256_hex;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    const PAYLOAD: &[u8] = b"cached artifact";

    fn variant(url: &str, integrity: Integrity) -> ArtifactVariant {
        ArtifactVariant {
            version: VersionSpec::Pinned("1.0.0".into()),
            integrity,
            download_url: url.to_string(),
            platform: PlatformConstraint::any(),
            post_install_notes: None,
        }
    }

    fn sha256_of(bytes: &[u8]) -> Integrity {
        Integrity::fixed(DigestAlgorithm::Sha256, &sha256_hex(bytes)).unwrap()
    }

    fn local(bytes: &[u8]) -> LocalArtifact {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        LocalArtifact::new(file.into_temp_path(), bytes.len() as u64, "tool.tar.gz")
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_callers_share_one_fetch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tool.tar.gz")
            .with_status(200)
            .with_body(PAYLOAD)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let cache = Arc::new(DownloadCache::new(Arc::new(RealRuntime), dir.path().join("cache")));
        let fetcher = Arc::new(
            HttpFetcher::new(HttpClient::new(reqwest::Client::new()).with_retry(RetryPolicy::none()))
                .with_temp_dir(dir.path().join("tmp")),
        );
        let v = variant(&format!("{}/tool.tar.gz", server.url()), sha256_of(PAYLOAD));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let fetcher = fetcher.clone();
            let v = v.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_fetch(fetcher.as_ref(), &v).await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            let artifact = handle.await.unwrap().unwrap();
            assert!(!artifact.is_unverified());
            paths.push(artifact.path().to_path_buf());
        }

        mock.assert_async().await;
        assert!(paths.iter().all(|p| *p == paths[0]));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_cached_artifact_survives_drop() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(local(PAYLOAD)));

        let artifact = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        let path = artifact.path().to_path_buf();
        assert!(matches!(artifact.file(), ArtifactFile::Cached(_)));
        drop(artifact);
        assert!(path.exists());

        // Served from memory: the mock allows only one fetch.
        let again = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        assert_eq!(again.path(), path);
    }

    #[tokio::test]
    async fn test_failures_are_evicted() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let mut fetcher = MockFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|v| Err(FetchError::transient(&v.download_url, "connection reset")));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(local(PAYLOAD)));

        let err = cache.get_or_fetch(&fetcher, &v).await.unwrap_err();
        assert!(matches!(
            err,
            CaskError::Fetch(FetchError {
                kind: FetchErrorKind::Transient,
                ..
            })
        ));

        assert!(cache.get_or_fetch(&fetcher, &v).await.is_ok());
    }

    #[tokio::test]
    async fn test_integrity_failure_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(local(b"tampered")));

        let err = cache.get_or_fetch(&fetcher, &v).await.unwrap_err();
        assert!(matches!(
            err,
            CaskError::Integrity(IntegrityError::Mismatch { .. })
        ));
        assert!(!cache.entry_path(&CacheKey::for_variant(&v)).exists());
    }

    #[tokio::test]
    async fn test_reuses_verified_file_from_previous_run() {
        let dir = tempdir().unwrap();
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let dest = cache.entry_path(&CacheKey::for_variant(&v));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, PAYLOAD).unwrap();

        // No expectations: any fetch would panic.
        let fetcher = MockFetcher::new();
        let artifact = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        assert_eq!(artifact.path(), dest);
        assert_eq!(artifact.digest(), Some(sha256_hex(PAYLOAD).as_str()));
    }

    #[tokio::test]
    async fn test_corrupt_file_from_previous_run_is_refetched() {
        let dir = tempdir().unwrap();
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let dest = cache.entry_path(&CacheKey::for_variant(&v));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"corrupt").unwrap();

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(local(PAYLOAD)));

        let artifact = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        assert_eq!(std::fs::read(artifact.path()).unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_failed_removal_of_stale_entry_is_not_fatal() {
        let dir = tempdir().unwrap();
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|p| p.exists());
        runtime
            .expect_remove_file()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("permission denied")));
        runtime
            .expect_create_dir_all()
            .returning(|p| Ok(std::fs::create_dir_all(p)?));
        runtime
            .expect_copy()
            .returning(|from, to| Ok(std::fs::copy(from, to)?));

        let cache = DownloadCache::new(Arc::new(runtime), dir.path());
        let dest = cache.entry_path(&CacheKey::for_variant(&v));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"corrupt").unwrap();

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(local(PAYLOAD)));

        let artifact = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        assert_eq!(artifact.path(), dest);
        assert_eq!(std::fs::read(&dest).unwrap(), PAYLOAD);
    }

    /// Fetches once without ever finishing, then succeeds.
    struct StallsFirst {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for StallsFirst {
        async fn fetch(&self, _variant: &ArtifactVariant) -> Result<LocalArtifact, FetchError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                std::future::pending::<()>().await;
            }
            Ok(local(PAYLOAD))
        }
    }

    #[tokio::test]
    async fn test_waiter_takes_over_when_first_caller_is_dropped() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(DownloadCache::new(Arc::new(RealRuntime), dir.path()));
        let fetcher = Arc::new(StallsFirst {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let v = variant("https://example.com/tool.tar.gz", sha256_of(PAYLOAD));

        let first = tokio::spawn({
            let (cache, fetcher, v) = (cache.clone(), fetcher.clone(), v.clone());
            async move { cache.get_or_fetch(fetcher.as_ref(), &v).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = tokio::spawn({
            let (cache, fetcher, v) = (cache.clone(), fetcher.clone(), v.clone());
            async move { cache.get_or_fetch(fetcher.as_ref(), &v).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let artifact = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("second caller should finish")
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(artifact.path()).unwrap(), PAYLOAD);
        assert_eq!(
            fetcher.calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn test_unverified_entries_are_flagged() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(Arc::new(RealRuntime), dir.path());
        let v = variant("https://example.com/latest/tool.tar.gz", Integrity::Skip);

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(local(PAYLOAD)));

        let artifact = cache.get_or_fetch(&fetcher, &v).await.unwrap();
        assert!(artifact.is_unverified());
        assert!(
            artifact
                .path()
                .parent()
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("unverified-")
        );
    }

    #[test]
    fn test_keys_differ_by_integrity() {
        let url = "https://example.com/tool.tar.gz";
        let cache = DownloadCache::new(Arc::new(RealRuntime), "/cache");
        let fixed = CacheKey::for_variant(&variant(url, sha256_of(PAYLOAD)));
        let skip = CacheKey::for_variant(&variant(url, Integrity::Skip));

        assert_ne!(fixed, skip);
        assert_ne!(cache.entry_path(&fixed), cache.entry_path(&skip));
        assert!(cache.entry_path(&fixed).ends_with("tool.tar.gz"));
    }
}
