//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::records::{CollectionItemRecord, ContentRecord, NavigationRecord};

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
  pub content_records: usize,
  pub collection_records: usize,
  pub collections: usize,
  pub has_navigation: bool,
}

/// Trait for cache storage backends.
///
/// Implementations own physical storage and never mutate records on their own.
/// Every put is a full overwrite at a stable key; `delete_collections_except`
/// must be atomic with respect to concurrent reads.
pub trait CacheStore: Send + Sync {
  /// Get a single content record by id.
  fn get_content(&self, id: &str) -> Result<Option<ContentRecord>>;

  /// Store (or overwrite) a content record.
  fn put_content(&self, record: &ContentRecord) -> Result<()>;

  /// Get the records of `alias` whose index falls in `range`, keyed by index.
  fn get_collection_window(
    &self,
    alias: &str,
    range: Range<usize>,
  ) -> Result<BTreeMap<usize, CollectionItemRecord>>;

  /// Store (or overwrite) collection records.
  fn put_collection_items(&self, records: &[CollectionItemRecord]) -> Result<()>;

  /// Every alias with at least one cached record.
  fn collection_aliases(&self) -> Result<BTreeSet<String>>;

  /// Delete all records of one alias. Returns the number of rows removed.
  fn delete_collection(&self, alias: &str) -> Result<usize>;

  /// Delete every collection group whose alias is not in `keep`.
  /// Returns the number of rows removed.
  fn delete_collections_except(&self, keep: &BTreeSet<String>) -> Result<usize>;

  /// Get the navigation record, if any.
  fn get_navigation(&self) -> Result<Option<NavigationRecord>>;

  /// Replace the navigation record.
  fn put_navigation(&self, record: &NavigationRecord) -> Result<()>;

  /// Remove every record of every kind.
  fn purge(&self) -> Result<()>;

  /// Compact the underlying storage. Invoked by the host, never by the engine.
  fn vacuum(&self) -> Result<()>;

  /// Row counts for diagnostics.
  fn stats(&self) -> Result<CacheStats>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStore for NoopStorage {
  fn get_content(&self, _id: &str) -> Result<Option<ContentRecord>> {
    Ok(None) // Always miss
  }

  fn put_content(&self, _record: &ContentRecord) -> Result<()> {
    Ok(()) // Discard
  }

  fn get_collection_window(
    &self,
    _alias: &str,
    _range: Range<usize>,
  ) -> Result<BTreeMap<usize, CollectionItemRecord>> {
    Ok(BTreeMap::new())
  }

  fn put_collection_items(&self, _records: &[CollectionItemRecord]) -> Result<()> {
    Ok(())
  }

  fn collection_aliases(&self) -> Result<BTreeSet<String>> {
    Ok(BTreeSet::new())
  }

  fn delete_collection(&self, _alias: &str) -> Result<usize> {
    Ok(0)
  }

  fn delete_collections_except(&self, _keep: &BTreeSet<String>) -> Result<usize> {
    Ok(0)
  }

  fn get_navigation(&self) -> Result<Option<NavigationRecord>> {
    Ok(None)
  }

  fn put_navigation(&self, _record: &NavigationRecord) -> Result<()> {
    Ok(())
  }

  fn purge(&self) -> Result<()> {
    Ok(())
  }

  fn vacuum(&self) -> Result<()> {
    Ok(())
  }

  fn stats(&self) -> Result<CacheStats> {
    Ok(CacheStats::default())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("content-sync").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Single content items
CREATE TABLE IF NOT EXISTS content_cache (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Collection entries by alias and server position
CREATE TABLE IF NOT EXISTS collection_cache (
    collection_alias TEXT NOT NULL,
    item_index INTEGER NOT NULL,
    payload TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (collection_alias, item_index)
);

-- Singleton navigation
CREATE TABLE IF NOT EXISTS navigation_cache (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    payload TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

impl CacheStore for SqliteStorage {
  fn get_content(&self, id: &str) -> Result<Option<ContentRecord>> {
    let conn = self.conn()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT payload, expires_at FROM content_cache WHERE id = ?",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read content {}: {}", id, e))?;

    match row {
      Some((payload, expires_at)) => Ok(Some(ContentRecord {
        id: id.to_string(),
        payload,
        expires_at: parse_datetime(&expires_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put_content(&self, record: &ContentRecord) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO content_cache (id, payload, expires_at) VALUES (?, ?, ?)",
        params![record.id, record.payload, format_datetime(record.expires_at)],
      )
      .map_err(|e| eyre!("Failed to store content {}: {}", record.id, e))?;

    Ok(())
  }

  fn get_collection_window(
    &self,
    alias: &str,
    range: Range<usize>,
  ) -> Result<BTreeMap<usize, CollectionItemRecord>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT item_index, payload, expires_at FROM collection_cache
         WHERE collection_alias = ? AND item_index >= ? AND item_index < ?
         ORDER BY item_index",
      )
      .map_err(|e| eyre!("Failed to prepare collection query: {}", e))?;

    let rows: Vec<(i64, String, String)> = stmt
      .query_map(params![alias, range.start, range.end], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query collection {}: {}", alias, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read collection {}: {}", alias, e))?;

    let mut window = BTreeMap::new();
    for (index, payload, expires_at) in rows {
      let index =
        usize::try_from(index).map_err(|_| eyre!("Invalid collection index {}", index))?;
      window.insert(
        index,
        CollectionItemRecord {
          collection_alias: alias.to_string(),
          index,
          payload,
          expires_at: parse_datetime(&expires_at)?,
        },
      );
    }

    Ok(window)
  }

  fn put_collection_items(&self, records: &[CollectionItemRecord]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for record in records {
      tx.execute(
        "INSERT OR REPLACE INTO collection_cache (collection_alias, item_index, payload, expires_at)
         VALUES (?, ?, ?, ?)",
        params![
          record.collection_alias,
          record.index,
          record.payload,
          format_datetime(record.expires_at)
        ],
      )
      .map_err(|e| eyre!("Failed to store collection entry: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn collection_aliases(&self) -> Result<BTreeSet<String>> {
    let conn = self.conn()?;
    select_aliases(&conn)
  }

  fn delete_collection(&self, alias: &str) -> Result<usize> {
    self
      .conn()?
      .execute(
        "DELETE FROM collection_cache WHERE collection_alias = ?",
        params![alias],
      )
      .map_err(|e| eyre!("Failed to delete collection {}: {}", alias, e))
  }

  fn delete_collections_except(&self, keep: &BTreeSet<String>) -> Result<usize> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut deleted = 0;
    for alias in select_aliases(&tx)?.difference(keep) {
      deleted += tx
        .execute(
          "DELETE FROM collection_cache WHERE collection_alias = ?",
          params![alias],
        )
        .map_err(|e| eyre!("Failed to delete collection {}: {}", alias, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted)
  }

  fn get_navigation(&self) -> Result<Option<NavigationRecord>> {
    let conn = self.conn()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT payload, expires_at FROM navigation_cache WHERE slot = 0",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read navigation: {}", e))?;

    match row {
      Some((payload, expires_at)) => Ok(Some(NavigationRecord {
        payload,
        expires_at: parse_datetime(&expires_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put_navigation(&self, record: &NavigationRecord) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO navigation_cache (slot, payload, expires_at) VALUES (0, ?, ?)",
        params![record.payload, format_datetime(record.expires_at)],
      )
      .map_err(|e| eyre!("Failed to store navigation: {}", e))?;

    Ok(())
  }

  fn purge(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(
        "BEGIN;
         DELETE FROM content_cache;
         DELETE FROM collection_cache;
         DELETE FROM navigation_cache;
         COMMIT;",
      )
      .map_err(|e| eyre!("Failed to purge cache: {}", e))
  }

  fn vacuum(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch("VACUUM")
      .map_err(|e| eyre!("Failed to vacuum cache: {}", e))
  }

  fn stats(&self) -> Result<CacheStats> {
    let conn = self.conn()?;
    let count = |sql: &str| -> Result<usize> {
      let n: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count cache rows: {}", e))?;
      usize::try_from(n).map_err(|_| eyre!("Invalid row count {}", n))
    };

    Ok(CacheStats {
      content_records: count("SELECT COUNT(*) FROM content_cache")?,
      collection_records: count("SELECT COUNT(*) FROM collection_cache")?,
      collections: count("SELECT COUNT(DISTINCT collection_alias) FROM collection_cache")?,
      has_navigation: count("SELECT COUNT(*) FROM navigation_cache")? > 0,
    })
  }
}

fn select_aliases(conn: &Connection) -> Result<BTreeSet<String>> {
  let mut stmt = conn
    .prepare("SELECT DISTINCT collection_alias FROM collection_cache")
    .map_err(|e| eyre!("Failed to prepare alias query: {}", e))?;

  let aliases: BTreeSet<String> = stmt
    .query_map([], |row| row.get(0))
    .map_err(|e| eyre!("Failed to query aliases: {}", e))?
    .collect::<rusqlite::Result<_>>()
    .map_err(|e| eyre!("Failed to read aliases: {}", e))?;

  Ok(aliases)
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp as stored by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
  }

  fn entry(alias: &str, index: usize, payload: &str) -> CollectionItemRecord {
    CollectionItemRecord {
      collection_alias: alias.to_string(),
      index,
      payload: payload.to_string(),
      expires_at: at(30),
    }
  }

  #[test]
  fn test_content_put_get_overwrite() {
    let store = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(store.get_content("a").unwrap(), None);

    let first = ContentRecord {
      id: "a".to_string(),
      payload: r#"{"v":1}"#.to_string(),
      expires_at: at(1),
    };
    store.put_content(&first).unwrap();
    assert_eq!(store.get_content("a").unwrap(), Some(first));

    let second = ContentRecord {
      id: "a".to_string(),
      payload: r#"{"v":2}"#.to_string(),
      expires_at: at(2),
    };
    store.put_content(&second).unwrap();
    assert_eq!(store.get_content("a").unwrap(), Some(second));
    assert_eq!(store.stats().unwrap().content_records, 1);
  }

  #[test]
  fn test_expiry_survives_round_trip_with_millis() {
    let store = SqliteStorage::open_in_memory().unwrap();
    let expires_at = at(5) + Duration::milliseconds(250);
    store
      .put_content(&ContentRecord {
        id: "a".to_string(),
        payload: "{}".to_string(),
        expires_at,
      })
      .unwrap();
    assert_eq!(store.get_content("a").unwrap().unwrap().expires_at, expires_at);
  }

  #[test]
  fn test_collection_window_is_partial_and_ordered() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store
      .put_collection_items(&[entry("top", 2, "c"), entry("top", 0, "a"), entry("top", 25, "z")])
      .unwrap();
    store.put_collection_items(&[entry("other", 1, "x")]).unwrap();

    let window = store.get_collection_window("top", 0..20).unwrap();
    assert_eq!(window.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(window[&2].payload, "c");

    let window = store.get_collection_window("top", 20..40).unwrap();
    assert_eq!(window.keys().copied().collect::<Vec<_>>(), vec![25]);
  }

  #[test]
  fn test_delete_collections_except_keeps_listed_aliases() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store
      .put_collection_items(&[entry("a", 0, "1"), entry("b", 0, "2"), entry("b", 1, "3"), entry("c", 0, "4")])
      .unwrap();
    store
      .put_content(&ContentRecord {
        id: "story".to_string(),
        payload: "{}".to_string(),
        expires_at: at(1),
      })
      .unwrap();

    let keep: BTreeSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(store.delete_collections_except(&keep).unwrap(), 2);
    assert_eq!(store.collection_aliases().unwrap(), keep);
    assert!(store.get_content("story").unwrap().is_some());
  }

  #[test]
  fn test_navigation_is_singleton() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store
      .put_navigation(&NavigationRecord {
        payload: "[1]".to_string(),
        expires_at: at(1),
      })
      .unwrap();
    store
      .put_navigation(&NavigationRecord {
        payload: "[2]".to_string(),
        expires_at: at(2),
      })
      .unwrap();
    assert_eq!(store.get_navigation().unwrap().unwrap().payload, "[2]");
    assert!(store.stats().unwrap().has_navigation);
  }

  #[test]
  fn test_purge_and_vacuum() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.put_collection_items(&[entry("a", 0, "1")]).unwrap();
    store
      .put_navigation(&NavigationRecord {
        payload: "[]".to_string(),
        expires_at: at(1),
      })
      .unwrap();

    store.purge().unwrap();
    store.vacuum().unwrap();
    assert_eq!(store.stats().unwrap(), CacheStats::default());
  }

  #[test]
  fn test_file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStorage::open(&path).unwrap();
      store.put_collection_items(&[entry("a", 3, "x")]).unwrap();
    }

    let store = SqliteStorage::open(&path).unwrap();
    assert_eq!(store.get_collection_window("a", 0..10).unwrap()[&3].payload, "x");
  }
}
