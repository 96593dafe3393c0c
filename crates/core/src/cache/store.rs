//! Durable backing stores for [`VersionedCache`](super::VersionedCache).
//!
//! The client variant persists to SQLite ([`CacheDb`](super::CacheDb)),
//! the server variant to Redis ([`RedisStore`](super::RedisStore)).
//! Failures are reported to the cache, which treats them as misses.

use async_trait::async_trait;

use super::entry::StoredEntry;
use crate::Error;

/// Key-value persistence keyed by namespace and uniqueness hash.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short label used in logs.
    fn kind(&self) -> &'static str;

    async fn read(&self, namespace: &str, uniqueness_hash: &str) -> Result<Option<StoredEntry>, Error>;

    async fn write(&self, namespace: &str, entry: &StoredEntry) -> Result<(), Error>;

    async fn remove(&self, namespace: &str, uniqueness_hash: &str) -> Result<(), Error>;

    async fn remove_all(&self, namespace: &str) -> Result<u64, Error>;
}
