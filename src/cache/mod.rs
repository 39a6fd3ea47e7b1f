//! Offline asset cache.
//!
//! This module provides the cache-first serving logic:
//! - Pre-populates a named cache from a fixed asset list, all or nothing
//! - Serves stored responses verbatim, falling back to the network on a miss
//! - Never writes network fallbacks back into the cache

mod error;
mod layer;
mod request;
mod storage;
mod traits;

pub use layer::AssetCache;
pub use request::{resolve_url, AssetRequest};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{AssetResponse, ServeSource};
