//! Cache layer that pre-populates a named cache and serves cache-first.

use color_eyre::Result;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::error::CacheError;
use super::request::AssetRequest;
use super::storage::CacheStorage;
use super::traits::{PopulateReport, ServeResult, ServeSource};
use crate::net::Fetcher;

/// Cache layer over an injected storage backend and network fetcher.
///
/// `populate` and `serve` are independent; nothing here orders them. The
/// driver decides when setup runs and when requests start arriving.
pub struct AssetCache<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
}

impl<S: CacheStorage, F: Fetcher> AssetCache<S, F> {
  /// Create a new cache layer with the given storage backend and fetcher.
  pub fn new(storage: S, fetcher: F) -> Self {
    Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Open (or create) `cache_name` and store a response for every asset.
  ///
  /// All assets are fetched before anything is written, and the writes go in
  /// one batch. If any fetch fails or returns a non-2xx status, the call fails
  /// with [`CacheError::Populate`] and no entry from this run is stored. The
  /// cache itself stays open (created) either way.
  pub async fn populate(&self, cache_name: &str, assets: &[Url]) -> Result<PopulateReport> {
    if cache_name.trim().is_empty() {
      return Err(CacheError::InvalidInput("cache name must not be empty".into()).into());
    }
    if assets.is_empty() {
      return Err(CacheError::InvalidInput("asset list must not be empty".into()).into());
    }

    self.storage.open(cache_name)?;

    let fetches = assets.iter().map(|url| {
      let request = AssetRequest::get(url.clone());
      async move {
        let response = self.fetcher.fetch(&request).await.map_err(|e| CacheError::Populate {
          url: url.to_string(),
          reason: e.to_string(),
        })?;

        if !response.is_success() {
          return Err(CacheError::Populate {
            url: url.to_string(),
            reason: format!("unexpected status {}", response.status),
          });
        }

        Ok((request.cache_key(), response))
      }
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(cache = cache_name, error = %e, "populate failed");
        return Err(e.into());
      }
    };

    self.storage.put_all(cache_name, &entries)?;

    let report = PopulateReport {
      cache_name: cache_name.to_string(),
      entries: entries.len(),
      bytes: entries.iter().map(|(_, r)| r.body.len()).sum(),
    };
    info!(
      cache = cache_name,
      entries = report.entries,
      bytes = report.bytes,
      "cache populated"
    );

    Ok(report)
  }

  /// Serve a request cache-first.
  ///
  /// 1. Look the request up across all caches - a hit is returned verbatim
  /// 2. On a miss, fetch from the network and return that response as-is
  ///
  /// Misses are never written back. Only GET requests can hit.
  pub async fn serve(&self, request: &AssetRequest) -> Result<ServeResult> {
    if request.is_cacheable() {
      if let Some(cached) = self.storage.lookup(&request.cache_key())? {
        debug!(url = %request.url, cache = %cached.cache_name, "cache hit");
        return Ok(ServeResult {
          response: cached.response,
          source: ServeSource::Cache {
            cache_name: cached.cache_name,
          },
        });
      }
    }

    debug!(url = %request.url, method = %request.method, "cache miss");

    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(ServeResult {
        response,
        source: ServeSource::Network,
      }),
      Err(e) => {
        warn!(url = %request.url, error = %e, "network fallback failed");
        Err(
          CacheError::Serve {
            url: request.url.to_string(),
            reason: e.to_string(),
          }
          .into(),
        )
      }
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for AssetCache<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
    }
  }
}
