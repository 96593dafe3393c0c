//! Versioned, content-addressed cache with in-flight request coalescing.
//!
//! Entries are keyed by a uniqueness hash (what was requested) and tagged
//! with a version hash (which state of the source data answered it). A
//! lookup never returns an entry whose version differs from the requested
//! one unless the caller asks for [`VersionRequest::AnyVersion`].
//!
//! Two variants share this type:
//!
//! - **client**: bounded in-memory LRU map in front of a durable SQLite store.
//! - **server**: no resolved in-memory map, optional Redis store. With no
//!   store configured every lookup misses and only coalescing remains.
//!
//! At most one fetch is in flight per uniqueness hash within a process. A
//! second `set_promise` for the same (uniqueness, version) pair, or a `get`
//! issued while the fetch runs, awaits the same shared future.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::entry::{CacheEntry, ParsedData, StoredEntry, VersionRequest};
use super::hash::hash_params;
use super::memory::LruMemory;
use super::store::DurableStore;
use crate::Error;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, Arc<Error>>>>;

/// Inspects a resolved payload and decides whether and where to cache it.
pub type ParseData<T> = Arc<dyn Fn(&T) -> ParsedData + Send + Sync>;

struct PendingFetch<T> {
    id: u64,
    version_hash: String,
    future: SharedFetch<T>,
}

/// Removes the pending entry it was created for when dropped, including
/// when the owning task is cancelled mid-await.
struct PendingGuard<'a, T> {
    pending: &'a Mutex<HashMap<String, PendingFetch<T>>>,
    uniqueness_hash: &'a str,
    id: u64,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(self.uniqueness_hash).is_some_and(|p| p.id == self.id) {
            pending.remove(self.uniqueness_hash);
        }
    }
}

pub struct VersionedCache<U, V, T> {
    name: String,
    store: Option<Arc<dyn DurableStore>>,
    memory: Option<Mutex<LruMemory<T>>>,
    pending: Mutex<HashMap<String, PendingFetch<T>>>,
    next_pending_id: AtomicU64,
    parse_data: ParseData<T>,
    _params: PhantomData<fn(&U, &V)>,
}

impl<U, V, T> VersionedCache<U, V, T>
where
    U: Serialize,
    V: Serialize,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Client variant: in-memory LRU of `capacity` entries over a durable store.
    pub fn client(
        name: impl Into<String>, store: Arc<dyn DurableStore>, capacity: usize,
        parse_data: impl Fn(&T) -> ParsedData + Send + Sync + 'static,
    ) -> Self {
        Self::build(name.into(), Some(store), Some(LruMemory::new(capacity)), Arc::new(parse_data))
    }

    /// Server variant: optional durable store, coalescing only in-process.
    pub fn server(
        prefix: impl Into<String>, store: Option<Arc<dyn DurableStore>>,
        parse_data: impl Fn(&T) -> ParsedData + Send + Sync + 'static,
    ) -> Self {
        Self::build(prefix.into(), store, None, Arc::new(parse_data))
    }

    fn build(
        name: String, store: Option<Arc<dyn DurableStore>>, memory: Option<LruMemory<T>>, parse_data: ParseData<T>,
    ) -> Self {
        Self {
            name,
            store,
            memory: memory.map(Mutex::new),
            pending: Mutex::new(HashMap::new()),
            next_pending_id: AtomicU64::new(1),
            parse_data,
            _params: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an entry: in-memory, then durable store, then in-flight fetch.
    ///
    /// Durable store failures are treated as misses. If an in-flight fetch
    /// the caller attached to fails, its error is returned as
    /// [`Error::Upstream`]. For an exact version request the in-flight
    /// result passes through `parse_data` and counts only when it is
    /// cacheable at that version.
    pub async fn get(&self, uniqueness: &U, version: VersionRequest<'_, V>) -> Result<Option<T>, Error> {
        let uniqueness_hash = hash_params(uniqueness)?;
        let version_hash = match version {
            VersionRequest::Exact(v) => Some(hash_params(v)?),
            VersionRequest::AnyVersion => None,
        };
        let accepts = |candidate: &str| version_hash.as_deref().is_none_or(|wanted| wanted == candidate);

        if let Some(memory) = &self.memory {
            let mut memory = memory.lock();
            if let Some(entry) = memory.get(&uniqueness_hash)
                && accepts(&entry.version_hash)
            {
                tracing::debug!(cache = %self.name, "memory hit");
                return Ok(Some(entry.data.clone()));
            }
        }

        if let Some(store) = &self.store {
            match store.read(&self.name, &uniqueness_hash).await {
                Ok(Some(stored)) if accepts(&stored.version_hash) => {
                    match serde_json::from_str::<T>(&stored.payload_json) {
                        Ok(data) => {
                            tracing::debug!(cache = %self.name, store = store.kind(), "durable hit");
                            if let Some(memory) = &self.memory {
                                memory.lock().insert(CacheEntry {
                                    uniqueness_hash: stored.uniqueness_hash,
                                    version_hash: stored.version_hash,
                                    data: data.clone(),
                                });
                            }
                            return Ok(Some(data));
                        }
                        Err(e) => {
                            tracing::warn!(cache = %self.name, error = %e, "undecodable cache payload; treating as miss");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(cache = %self.name, store = store.kind(), error = %e, "cache read failed");
                }
            }
        }

        let in_flight = {
            let pending = self.pending.lock();
            pending
                .get(&uniqueness_hash)
                .filter(|p| accepts(&p.version_hash))
                .map(|p| p.future.clone())
        };

        let Some(future) = in_flight else {
            return Ok(None);
        };

        tracing::debug!(cache = %self.name, "attaching to in-flight fetch");
        let data = future.await.map_err(Error::Upstream)?;

        let Some(wanted) = version_hash else {
            return Ok(Some(data));
        };
        let parsed = (self.parse_data)(&data);
        if parsed.should_store && parsed.version_hash == wanted {
            Ok(Some(data))
        } else {
            tracing::debug!(cache = %self.name, "in-flight result does not match requested version");
            Ok(None)
        }
    }

    /// Register `fetch` as the in-flight fetch for `(uniqueness, version)` and
    /// await it.
    ///
    /// The pending entry is visible to concurrent callers before the fetch is
    /// first polled. If an identical fetch is already in flight, `fetch` is
    /// dropped unpolled and this call awaits the existing one. On resolution
    /// the payload is handed to `parse_data`; it is persisted only when it is
    /// cacheable and its actual version hash equals the optimistic one. The
    /// pending entry is removed on every outcome.
    pub async fn set_promise<F>(&self, fetch: F, uniqueness: &U, version: &V) -> Result<T, Arc<Error>>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let uniqueness_hash = hash_params(uniqueness).map_err(Arc::new)?;
        let version_hash = hash_params(version).map_err(Arc::new)?;

        let (id, future, owner) = {
            let mut pending = self.pending.lock();
            match pending.get(&uniqueness_hash) {
                Some(existing) if existing.version_hash == version_hash => {
                    (existing.id, existing.future.clone(), false)
                }
                _ => {
                    let id = self.next_pending_id.fetch_add(1, Ordering::Relaxed);
                    let future = fetch.map(|result| result.map_err(Arc::new)).boxed().shared();
                    pending.insert(
                        uniqueness_hash.clone(),
                        PendingFetch { id, version_hash: version_hash.clone(), future: future.clone() },
                    );
                    (id, future, true)
                }
            }
        };

        if !owner {
            tracing::debug!(cache = %self.name, pending_id = id, "coalesced with in-flight fetch");
            return future.await;
        }

        let _guard = PendingGuard { pending: &self.pending, uniqueness_hash: &uniqueness_hash, id };
        let result = future.await;

        match &result {
            Ok(data) => self.settle(&version_hash, data).await,
            Err(e) => tracing::debug!(cache = %self.name, error = %e, "fetch failed; nothing cached"),
        }

        result
    }

    /// Return a version-matching entry, or run `fetch` through
    /// [`set_promise`](Self::set_promise).
    pub async fn get_or_fetch<F, Fut>(&self, uniqueness: &U, version: &V, fetch: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if let Some(hit) = self.get(uniqueness, VersionRequest::Exact(version)).await? {
            return Ok(hit);
        }

        self.set_promise(fetch(), uniqueness, version)
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(Error::Upstream))
    }

    async fn settle(&self, optimistic_version: &str, data: &T) {
        let parsed = (self.parse_data)(data);

        if !parsed.should_store {
            tracing::debug!(cache = %self.name, "payload not cacheable; discarding");
            return;
        }

        if parsed.version_hash != optimistic_version {
            tracing::warn!(
                cache = %self.name,
                uniqueness_hash = %parsed.uniqueness_hash,
                expected = %optimistic_version,
                actual = %parsed.version_hash,
                "source changed during fetch; result not cached"
            );
            return;
        }

        if let Some(store) = &self.store {
            match serde_json::to_string(data) {
                Ok(payload_json) => {
                    let stored = StoredEntry {
                        uniqueness_hash: parsed.uniqueness_hash.clone(),
                        version_hash: parsed.version_hash.clone(),
                        payload_json,
                    };
                    if let Err(e) = store.write(&self.name, &stored).await {
                        tracing::warn!(cache = %self.name, store = store.kind(), error = %e, "cache write failed");
                    }
                }
                Err(e) => tracing::warn!(cache = %self.name, error = %e, "payload not serializable; not persisted"),
            }
        }

        if let Some(memory) = &self.memory {
            memory.lock().insert(CacheEntry {
                uniqueness_hash: parsed.uniqueness_hash,
                version_hash: parsed.version_hash,
                data: data.clone(),
            });
        }
    }

    /// Drop one entry from memory and the durable store.
    pub async fn clear_entry(&self, uniqueness: &U) -> Result<(), Error> {
        let uniqueness_hash = hash_params(uniqueness)?;
        if let Some(memory) = &self.memory {
            memory.lock().remove(&uniqueness_hash);
        }
        if let Some(store) = &self.store
            && let Err(e) = store.remove(&self.name, &uniqueness_hash).await
        {
            tracing::warn!(cache = %self.name, error = %e, "cache delete failed");
        }
        Ok(())
    }

    /// Drop every entry this cache owns. Returns the durable entries removed.
    pub async fn clear_all(&self) -> u64 {
        if let Some(memory) = &self.memory {
            memory.lock().clear();
        }
        match &self.store {
            Some(store) => store.remove_all(&self.name).await.unwrap_or_else(|e| {
                tracing::warn!(cache = %self.name, error = %e, "cache clear failed");
                0
            }),
            None => 0,
        }
    }

    /// Whether a fetch for these params is currently in flight.
    pub fn is_pending(&self, uniqueness: &U) -> bool {
        hash_params(uniqueness).is_ok_and(|hash| self.pending.lock().contains_key(&hash))
    }

    /// Whether these params are held in the in-memory layer.
    pub fn is_resident(&self, uniqueness: &U) -> bool {
        match (&self.memory, hash_params(uniqueness)) {
            (Some(memory), Ok(hash)) => memory.lock().contains(&hash),
            _ => false,
        }
    }
}
