//! Cache storage trait, in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{body_digest, AssetResponse, CachedResponse, EntryInfo};

/// Trait for cache storage backends.
///
/// A backend holds any number of named caches. Each cache maps a request key
/// to one response; writing an existing key replaces its entry.
pub trait CacheStorage: Send + Sync {
  /// Open the named cache, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Upsert all entries into the named cache. Either every entry is written or none is.
  fn put_all(&self, name: &str, entries: &[(String, AssetResponse)]) -> Result<()>;

  /// Find an entry for `key`, searching caches in creation order.
  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Entries of the named cache in insertion order.
  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>>;

  /// Names of all caches in creation order.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Remove a cache and its entries. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;
}

struct MemoryCache {
  name: String,
  entries: Vec<(String, CachedResponse)>,
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<Vec<MemoryCache>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !caches.iter().any(|c| c.name == name) {
      caches.push(MemoryCache {
        name: name.to_string(),
        entries: Vec::new(),
      });
    }
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, AssetResponse)]) -> Result<()> {
    self.open(name)?;
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let cache = caches
      .iter_mut()
      .find(|c| c.name == name)
      .ok_or_else(|| eyre!("Cache {} disappeared while writing", name))?;

    let stored_at = Utc::now();
    for (key, response) in entries {
      let cached = CachedResponse {
        cache_name: name.to_string(),
        response: response.clone(),
        stored_at,
        digest: body_digest(&response.body),
      };
      match cache.entries.iter_mut().find(|(k, _)| k == key) {
        Some(existing) => existing.1 = cached,
        None => cache.entries.push((key.clone(), cached)),
      }
    }
    Ok(())
  }

  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      caches
        .iter()
        .flat_map(|c| c.entries.iter())
        .find(|(k, _)| k == key)
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      caches
        .iter()
        .find(|c| c.name == name)
        .map(|c| {
          c.entries
            .iter()
            .map(|(key, cached)| EntryInfo {
              key: key.clone(),
              status: cached.response.status,
              size: cached.response.body.len(),
              digest: cached.digest.clone(),
              stored_at: cached.stored_at,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.iter().map(|c| c.name.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = caches.len();
    caches.retain(|c| c.name != name);
    Ok(caches.len() != before)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open_path(&Self::default_path()?)
  }

  /// Open or create the database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches; id gives creation order for lookups
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    body_digest TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, AssetResponse)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
      let digest = body_digest(&response.body);

      // Upsert keeps the original row position, so listings stay in insertion order
      tx.execute(
        "INSERT INTO cache_entries (cache_name, request_key, status, headers, body, body_digest, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
         ON CONFLICT (cache_name, request_key) DO UPDATE SET
           status = excluded.status,
           headers = excluded.headers,
           body = excluded.body,
           body_digest = excluded.body_digest,
           stored_at = excluded.stored_at",
        params![name, key, response.status, headers, response.body, digest],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.cache_name, e.status, e.headers, e.body, e.body_digest, e.stored_at
         FROM cache_entries e
         INNER JOIN caches c ON c.name = e.cache_name
         WHERE e.request_key = ?
         ORDER BY c.id
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String, String)> = stmt
      .query_row(params![key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((cache_name, status, headers, body, digest, stored_at)) => {
        let headers: Vec<(String, Vec<u8>)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        Ok(Some(CachedResponse {
          cache_name,
          response: AssetResponse {
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
          digest,
        }))
      }
      None => Ok(None),
    }
  }

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT request_key, status, length(body), body_digest, stored_at
         FROM cache_entries
         WHERE cache_name = ?
         ORDER BY rowid",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<(String, u16, i64, String, String)> = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entries: {}", e))?;

    rows
      .into_iter()
      .map(|(key, status, size, digest, stored_at)| {
        Ok(EntryInfo {
          key,
          status,
          size: size.max(0) as usize,
          digest,
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read caches: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn entry(key: &str, body: &str) -> (String, AssetResponse) {
    (
      key.to_string(),
      AssetResponse::new(200, body).with_header("content-type", "text/plain"),
    )
  }

  fn sqlite(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::open_path(&dir.path().join("nested").join("cache.db")).unwrap()
  }

  fn check_backend(storage: &dyn CacheStorage) {
    storage.open("v1").unwrap();
    storage.open("v1").unwrap();
    assert_eq!(storage.cache_names().unwrap(), vec!["v1"]);

    storage
      .put_all("v1", &[entry("http://a/", "root"), entry("http://a/x", "x")])
      .unwrap();
    storage.put_all("v1", &[entry("http://a/", "root-2")]).unwrap();

    let entries = storage.entries("v1").unwrap();
    let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["http://a/", "http://a/x"]);
    assert_eq!(entries[0].size, "root-2".len());
    assert_eq!(entries[0].digest, body_digest(b"root-2"));

    let hit = storage.lookup("http://a/").unwrap().unwrap();
    assert_eq!(hit.cache_name, "v1");
    assert_eq!(hit.response.body, b"root-2");
    assert_eq!(hit.response.header("Content-Type"), Some(&b"text/plain"[..]));
    assert!(storage.lookup("http://a/missing").unwrap().is_none());

    // Lookup spans caches; the oldest cache wins
    storage
      .put_all("v2", &[entry("http://a/", "newer"), entry("http://a/only-v2", "y")])
      .unwrap();
    assert_eq!(storage.lookup("http://a/").unwrap().unwrap().cache_name, "v1");
    assert_eq!(
      storage.lookup("http://a/only-v2").unwrap().unwrap().cache_name,
      "v2"
    );

    assert!(storage.delete("v1").unwrap());
    assert!(!storage.delete("v1").unwrap());
    assert_eq!(storage.cache_names().unwrap(), vec!["v2"]);
    assert_eq!(storage.lookup("http://a/").unwrap().unwrap().cache_name, "v2");
    assert!(storage.entries("v1").unwrap().is_empty());
  }

  #[test]
  fn test_memory_storage_behaviour() {
    check_backend(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage_behaviour() {
    let dir = TempDir::new().unwrap();
    check_backend(&sqlite(&dir));
  }

  #[test]
  fn test_sqlite_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
      let storage = sqlite(&dir);
      storage.put_all("v1", &[entry("http://a/", "root")]).unwrap();
    }

    let storage = sqlite(&dir);
    let hit = storage.lookup("http://a/").unwrap().unwrap();
    assert_eq!(hit.response.body, b"root");
    assert_eq!(hit.response.status, 200);
  }

  #[test]
  fn test_sqlite_keeps_non_utf8_header_values() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite(&dir);
    let response = AssetResponse::new(200, "body").with_header("x-name", &b"caf\xe9"[..]);
    storage
      .put_all("v1", &[("http://a/".to_string(), response.clone())])
      .unwrap();

    let hit = storage.lookup("http://a/").unwrap().unwrap();
    assert_eq!(hit.response, response);
    assert_eq!(hit.response.header("x-name"), Some(&b"caf\xe9"[..]));
  }

  #[test]
  fn test_sqlite_put_all_is_atomic() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite(&dir);
    storage.put_all("v1", &[entry("http://a/", "old")]).unwrap();

    // Reject one key with a trigger so the batch fails midway
    {
      let conn = storage.conn.lock().unwrap();
      conn
        .execute_batch(
          "CREATE TRIGGER reject_bad BEFORE INSERT ON cache_entries
           WHEN NEW.request_key = 'http://a/bad'
           BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    }

    let result = storage.put_all(
      "v1",
      &[entry("http://a/new", "new"), entry("http://a/bad", "bad")],
    );
    assert!(result.is_err());
    assert!(storage.lookup("http://a/new").unwrap().is_none());
    assert_eq!(
      storage.lookup("http://a/").unwrap().unwrap().response.body,
      b"old"
    );
  }
}
