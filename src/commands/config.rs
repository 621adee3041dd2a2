use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

use crate::http::RetryPolicy;
use crate::runtime::Runtime;

/// Directory and retry settings for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root: PathBuf,
    pub casks_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub receipts_dir: PathBuf,
    pub appdir: PathBuf,
    pub retry: RetryPolicy,
}

/// Values given on the command line, taking precedence over defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub casks_dir: Option<PathBuf>,
    pub appdir: Option<PathBuf>,
}

impl Config {
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, overrides: ConfigOverrides) -> Result<Self> {
        let root = match overrides.root {
            Some(root) => root,
            None => default_root(runtime)?,
        };
        let casks_dir = overrides.casks_dir.unwrap_or_else(|| root.join("Casks"));
        let appdir = overrides.appdir.unwrap_or_else(|| default_appdir(&root));

        let mut retry = RetryPolicy::default();
        if let Ok(value) = runtime.env_var("CASKR_RETRIES") {
            retry.max_attempts = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid CASKR_RETRIES value '{}'", value))?;
        }
        if let Ok(value) = runtime.env_var("CASKR_RETRY_DELAY_MS") {
            let millis: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid CASKR_RETRY_DELAY_MS value '{}'", value))?;
            retry.delay = Duration::from_millis(millis);
        }

        let config = Self {
            cache_dir: root.join("cache"),
            receipts_dir: root.join("receipts"),
            casks_dir,
            appdir,
            retry,
            root,
        };
        debug!("Using config {:?}", config);
        Ok(config)
    }
}

/// `~/.caskr`
pub fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    let home_dir = runtime
        .home_dir()
        .context("Could not find home directory")?;
    Ok(home_dir.join(".caskr"))
}

#[cfg(target_os = "macos")]
fn default_appdir(_root: &std::path::Path) -> PathBuf {
    PathBuf::from("/Applications")
}

#[cfg(not(target_os = "macos"))]
fn default_appdir(root: &std::path::Path) -> PathBuf {
    root.join("Applications")
}
