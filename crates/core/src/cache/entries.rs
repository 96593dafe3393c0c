//! Durable client store operations.
//!
//! Entries are keyed `"<cacheName>/<uniquenessHash>"`, one row per key.
//! Reads refresh `last_accessed_at`, which LRU purging orders by.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::entry::StoredEntry;
use super::store::DurableStore;
use crate::Error;

/// Key of an entry in the durable client store.
pub fn client_store_key(cache_name: &str, uniqueness_hash: &str) -> String {
    format!("{cache_name}/{uniqueness_hash}")
}

impl CacheDb {
    /// Insert or replace the entry for its uniqueness hash.
    pub async fn upsert_entry(&self, namespace: &str, entry: &StoredEntry) -> Result<(), Error> {
        let key = client_store_key(namespace, &entry.uniqueness_hash);
        let namespace = namespace.to_string();
        let entry = entry.clone();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (
                    cache_key, namespace, uniqueness_hash, version_hash,
                    payload_json, stored_at, last_accessed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(cache_key) DO UPDATE SET
                    version_hash = excluded.version_hash,
                    payload_json = excluded.payload_json,
                    stored_at = excluded.stored_at,
                    last_accessed_at = excluded.last_accessed_at",
                    params![key, namespace, entry.uniqueness_hash, entry.version_hash, entry.payload_json, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry by uniqueness hash, refreshing its access time.
    ///
    /// Returns None if the key doesn't exist in the store.
    pub async fn get_entry(&self, namespace: &str, uniqueness_hash: &str) -> Result<Option<StoredEntry>, Error> {
        let key = client_store_key(namespace, uniqueness_hash);
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Option<StoredEntry>, Error> {
                let result = conn.query_row(
                    "SELECT uniqueness_hash, version_hash, payload_json
                     FROM cache_entries WHERE cache_key = ?1",
                    params![key],
                    |row| Ok(StoredEntry { uniqueness_hash: row.get(0)?, version_hash: row.get(1)?, payload_json: row.get(2)? }),
                );

                match result {
                    Ok(entry) => {
                        conn.execute(
                            "UPDATE cache_entries SET last_accessed_at = ?1 WHERE cache_key = ?2",
                            params![now, key],
                        )?;
                        Ok(Some(entry))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one entry. Returns the number of deleted rows.
    pub async fn delete_entry(&self, namespace: &str, uniqueness_hash: &str) -> Result<u64, Error> {
        let key = client_store_key(namespace, uniqueness_hash);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry of one cache.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE namespace = ?1", params![namespace])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries across all caches.
    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Purge least-recently-accessed entries until count <= max_entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_lru_entries(&self, max_entries: usize) -> Result<u64, Error> {
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE cache_key IN (
                    SELECT cache_key FROM cache_entries ORDER BY last_accessed_at ASC LIMIT ?1
                )",
                    params![to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl DurableStore for CacheDb {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn read(&self, namespace: &str, uniqueness_hash: &str) -> Result<Option<StoredEntry>, Error> {
        self.get_entry(namespace, uniqueness_hash).await
    }

    async fn write(&self, namespace: &str, entry: &StoredEntry) -> Result<(), Error> {
        self.upsert_entry(namespace, entry).await
    }

    async fn remove(&self, namespace: &str, uniqueness_hash: &str) -> Result<(), Error> {
        self.delete_entry(namespace, uniqueness_hash).await.map(|_| ())
    }

    async fn remove_all(&self, namespace: &str) -> Result<u64, Error> {
        self.delete_namespace(namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(hash: &str, version: &str) -> StoredEntry {
        StoredEntry {
            uniqueness_hash: hash.to_string(),
            version_hash: version.to_string(),
            payload_json: r#"{"success":true,"data":[]}"#.to_string(),
        }
    }

    #[test]
    fn test_client_store_key() {
        assert_eq!(client_store_key("results", "abc"), "results/abc");
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry("results", &make_entry("abc", "v1")).await.unwrap();

        let retrieved = db.get_entry("results", "abc").await.unwrap().unwrap();
        assert_eq!(retrieved.version_hash, "v1");

        db.upsert_entry("results", &make_entry("abc", "v2")).await.unwrap();
        let retrieved = db.get_entry("results", "abc").await.unwrap().unwrap();
        assert_eq!(retrieved.version_hash, "v2");
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry("results", &make_entry("abc", "v1")).await.unwrap();
        db.upsert_entry("bounds", &make_entry("abc", "v1")).await.unwrap();

        assert!(db.get_entry("missing", "abc").await.unwrap().is_none());

        let deleted = db.delete_namespace("results").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_entry("results", "abc").await.unwrap().is_none());
        assert!(db.get_entry("bounds", "abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_lru() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry("results", &make_entry("a", "v1")).await.unwrap();
        db.upsert_entry("results", &make_entry("b", "v1")).await.unwrap();

        let deleted = db.purge_lru_entries(1).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count_entries().await.unwrap(), 1);

        assert_eq!(db.purge_lru_entries(5).await.unwrap(), 0);
    }
}
