//! Downloading a resolved variant into a scoped temporary file.

use async_trait::async_trait;
use log::info;
use reqwest::Url;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::manifest::ArtifactVariant;

/// A downloaded but not yet verified artifact.
///
/// The file lives in a temporary location and is deleted when this value is
/// dropped, whatever the exit path.
#[derive(Debug)]
pub struct LocalArtifact {
    path: TempPath,
    size: u64,
    file_name: String,
}

impl LocalArtifact {
    pub fn new(path: TempPath, size: u64, file_name: impl Into<String>) -> Self {
        Self {
            path,
            size,
            file_name: file_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written by the download.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Name of the artifact as served, taken from the URL.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub(crate) fn into_parts(self) -> (TempPath, String) {
        (self.path, self.file_name)
    }
}

/// Fetch the artifact of a resolved variant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, variant: &ArtifactVariant) -> Result<LocalArtifact, FetchError>;
}

/// Fetcher backed by [`HttpClient`].
pub struct HttpFetcher {
    http: HttpClient,
    temp_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            temp_dir: None,
        }
    }

    /// Place temporary downloads in `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }

    fn temp_file(&self, url: &str) -> Result<tempfile::NamedTempFile, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("caskr-").suffix(".part");
        let file = match &self.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    FetchError::permanent(url, format!("failed to create {:?}: {}", dir, e))
                })?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        };
        file.map_err(|e| FetchError::permanent(url, format!("failed to create temp file: {}", e)))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip(self, variant), fields(url = %variant.download_url))]
    async fn fetch(&self, variant: &ArtifactVariant) -> Result<LocalArtifact, FetchError> {
        let url = variant.download_url.as_str();
        info!("Downloading {}...", url);

        // Dropping the NamedTempFile on any error path removes it.
        let temp = self.temp_file(url)?;
        let path = temp.path().to_path_buf();

        let size = self
            .http
            .download_file(url, || {
                OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| {
                        FetchError::permanent(url, format!("failed to open {:?}: {}", path, e))
                    })
            })
            .await?;

        info!("Download complete.");
        Ok(LocalArtifact::new(
            temp.into_temp_path(),
            size,
            artifact_file_name(url),
        ))
    }
}

/// Last path segment of `url`, used to name the artifact on disk.
pub fn artifact_file_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| "artifact".to_string())
}
