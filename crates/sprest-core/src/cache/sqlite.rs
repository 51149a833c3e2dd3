//! SQLite-backed persistent store.

use super::traits::{CacheEntry, CacheStore};
use crate::error::{Result, SpRestError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Local store persisted in a single SQLite table.
///
/// Thread-safe via internal mutex on the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpRestError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| SpRestError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| SpRestError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::from_connection(conn)
    }

    /// A store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SpRestError::Database {
            message: format!("Failed to open in-memory database: {}", e),
            source: Some(e),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expiration TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expiration
                ON cache_entries(expiration);
            "#,
        )
        .map_err(|e| SpRestError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| SpRestError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }
}

/// Fixed-width UTC timestamps so `expiration` sorts chronologically as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT value, expiration FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| SpRestError::Database {
                message: format!("Failed to query cache entry: {}", e),
                source: Some(e),
            })?;

        let Some((value, expiration)) = row else {
            return Ok(None);
        };

        let expiration = DateTime::parse_from_rfc3339(&expiration)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SpRestError::Cache {
                message: format!("Invalid expiration for {}: {}", key, e),
            })?;

        Ok(Some(CacheEntry {
            value: serde_json::from_str(&value)?,
            expiration,
        }))
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let value = serde_json::to_string(&entry.value)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expiration) VALUES (?1, ?2, ?3)",
            params![key, value, timestamp(entry.expiration)],
        )
        .map_err(|e| SpRestError::Database {
            message: format!("Failed to set cache entry: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map_err(|e| SpRestError::Database {
                message: format!("Failed to delete cache entry: {}", e),
                source: Some(e),
            })?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM cache_entries")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE expiration <= ?1",
                params![timestamp(now)],
            )
            .map_err(|e| SpRestError::Database {
                message: format!("Failed to cleanup expired entries: {}", e),
                source: Some(e),
            })?;

        if deleted > 0 {
            debug!("Cleaned up {} expired cache entries", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache").join("sprest.sqlite");
        let store = SqliteStore::open(&db_path).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_put_and_get() {
        let (_temp, store) = create_test_store();
        let expiration = Utc::now() + Duration::minutes(5);

        store
            .put("https://contoso/_api/web", CacheEntry::new(json!({"Title": "Dev"}), expiration))
            .unwrap();

        let entry = store.get("https://contoso/_api/web").unwrap().unwrap();
        assert_eq!(entry.value, json!({"Title": "Dev"}));
        assert_eq!(entry.expiration.timestamp(), expiration.timestamp());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("sprest.sqlite");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store
                .put("k", CacheEntry::new(json!([1, 2, 3]), Utc::now() + Duration::hours(1)))
                .unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap().value, json!([1, 2, 3]));
    }

    #[test]
    fn test_delete_and_keys() {
        let store = SqliteStore::open_in_memory().unwrap();
        let expiration = Utc::now() + Duration::minutes(1);
        store.put("a", CacheEntry::new(json!(1), expiration)).unwrap();
        store.put("b", CacheEntry::new(json!(2), expiration)).unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.delete("a").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_delete_expired() {
        let (_temp, store) = create_test_store();
        let now = Utc::now();
        store
            .put("old", CacheEntry::new(json!(1), now - Duration::seconds(5)))
            .unwrap();
        store
            .put("new", CacheEntry::new(json!(2), now + Duration::minutes(5)))
            .unwrap();

        assert_eq!(store.delete_expired(now).unwrap(), 1);
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("new").unwrap().is_some());
        assert!(store.is_available());
    }
}
