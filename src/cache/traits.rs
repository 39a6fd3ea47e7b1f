//! Core types shared by the cache layer and storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A response as returned by the network and as stored in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetResponse {
  /// HTTP status code
  pub status: u16,
  /// Response headers in the order the server sent them. Values are raw bytes
  /// since HTTP does not require them to be UTF-8.
  pub headers: Vec<(String, Vec<u8>)>,
  /// Raw body bytes
  pub body: Vec<u8>,
}

impl AssetResponse {
  #[allow(dead_code)]
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[allow(dead_code)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// True for 2xx statuses. Only these may be written by populate.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name` (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&[u8]> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_slice())
  }
}

/// A stored response together with where and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// Name of the cache the entry was found in
  pub cache_name: String,
  pub response: AssetResponse,
  pub stored_at: DateTime<Utc>,
  /// Hex SHA-256 of the body
  pub digest: String,
}

/// Summary of one stored entry, used for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
  pub key: String,
  pub status: u16,
  pub size: usize,
  pub digest: String,
  pub stored_at: DateTime<Utc>,
}

/// Outcome of a successful populate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulateReport {
  pub cache_name: String,
  pub entries: usize,
  pub bytes: usize,
}

/// Result of serving a request, including where the response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeResult {
  pub response: AssetResponse,
  pub source: ServeSource,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeSource {
  /// Stored entry from the named cache
  Cache { cache_name: String },
  /// Live network fetch after a miss
  Network,
}

impl ServeSource {
  #[allow(dead_code)]
  pub fn is_cache(&self) -> bool {
    matches!(self, Self::Cache { .. })
  }
}

/// Hex-encoded SHA-256 of a response body.
pub fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}
