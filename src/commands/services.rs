//! Service factory for building command dependencies.
//!
//! Services are built from configuration values but are not part of the
//! configuration itself.

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use reqwest::Client;

use crate::{
    cache::DownloadCache,
    fetch::HttpFetcher,
    http::{HttpClient, RetryPolicy},
    pipeline::Pipeline,
    runtime::Runtime,
};

use super::config::Config;

pub const USER_AGENT: &str = concat!("caskr/", env!("CASKR_VERSION"));

/// Build an HTTP client with the given retry policy
pub fn build_http_client(retry: RetryPolicy) -> Result<HttpClient> {
    let client = Client::builder().user_agent(USER_AGENT).build()?;
    debug!("HTTP client configured with {:?}", retry);
    Ok(HttpClient::new(client).with_retry(retry))
}

/// Build a fetcher whose partial downloads live next to the cache, so
/// finished ones can be renamed into it.
pub fn build_fetcher(config: &Config) -> Result<HttpFetcher> {
    let http_client = build_http_client(config.retry)?;
    Ok(HttpFetcher::new(http_client).with_temp_dir(config.cache_dir.join("tmp")))
}

pub fn build_cache(runtime: Arc<dyn Runtime>, config: &Config) -> Arc<DownloadCache> {
    Arc::new(DownloadCache::new(runtime, &config.cache_dir))
}

/// A cached pipeline over HTTP.
pub fn build_pipeline(runtime: Arc<dyn Runtime>, config: &Config) -> Result<Pipeline<HttpFetcher>> {
    Ok(Pipeline::new(build_fetcher(config)?).with_cache(build_cache(runtime, config)))
}
