//! Error taxonomy for cache operations.

use thiserror::Error;

/// Failures reported by [`AssetCache`](super::AssetCache).
///
/// These travel inside a `color_eyre::Report`; callers that need to tell them
/// apart use `report.downcast_ref::<CacheError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// Rejected before any I/O happened.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// An asset could not be fetched during populate. Nothing from the run was stored.
  #[error("failed to populate cache: {url}: {reason}")]
  Populate { url: String, reason: String },

  /// Cache miss and the network fallback failed as well.
  #[error("failed to serve {url}: {reason}")]
  Serve { url: String, reason: String },
}
