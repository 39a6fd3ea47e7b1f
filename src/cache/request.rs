//! Requests and the key they are matched by.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

/// A request for a resource. Only the URL takes part in matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub method: Method,
  pub url: Url,
}

impl AssetRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Build a GET request from a possibly relative identifier.
  pub fn resolve(origin: &Url, raw: &str) -> Result<Self> {
    Ok(Self::get(resolve_url(origin, raw)?))
  }

  /// Whether this request is eligible for a cache lookup at all.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::GET
  }

  /// Key this request is stored and looked up under.
  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

/// Resolve `raw` against `origin`. Absolute URLs pass through unchanged.
pub fn resolve_url(origin: &Url, raw: &str) -> Result<Url> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(eyre!("Empty resource identifier"));
  }
  origin
    .join(raw)
    .map_err(|e| eyre!("Invalid resource identifier '{}': {}", raw, e))
}

/// Exact-match key: the parsed URL without its fragment.
///
/// Parsing already lowercases scheme and host, drops default ports and
/// removes dot segments. The query string is kept as-is.
pub fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}
