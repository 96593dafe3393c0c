//! Supersession guard for re-issued requests.
//!
//! In-flight fetches cannot be cancelled. A caller that re-issues a query
//! takes a new ticket; results arriving for an older ticket are dropped.
//!
//! This is a caller-side utility for library consumers that hold a long-lived
//! view over one query (a dashboard panel, a polling loop). The cache and the
//! stateless tool handlers never take tickets themselves: each tool call
//! already answers exactly one request.
//!
//! ```ignore
//! let ticket = guard.begin();
//! let resp = cache.get_or_fetch(&key, &version, fetch).await?;
//! if let Some(resp) = ticket.accept(resp) {
//!     render(resp);
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic request-id source shared by one logical requester.
#[derive(Debug, Clone, Default)]
pub struct RequestGuard {
    latest: Arc<AtomicU64>,
}

/// Identifies one issued request.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, superseding every earlier ticket.
    pub fn begin(&self) -> RequestTicket {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        RequestTicket { id, latest: Arc::clone(&self.latest) }
    }
}

impl RequestTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while no newer request has been issued.
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.id
    }

    /// Keep `value` only if this ticket is still current.
    pub fn accept<T>(&self, value: T) -> Option<T> {
        if self.is_current() {
            Some(value)
        } else {
            tracing::debug!(request_id = self.id, "dropping superseded result");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_ticket_is_current() {
        let guard = RequestGuard::new();
        let first = guard.begin();
        assert!(first.is_current());

        let second = guard.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_accept_drops_late_results() {
        let guard = RequestGuard::new();
        let stale = guard.begin();
        let fresh = guard.begin();

        assert_eq!(stale.accept("old"), None);
        assert_eq!(fresh.accept("new"), Some("new"));
    }

    #[tokio::test]
    async fn test_superseded_cache_fetch_is_dropped() {
        use crate::cache::{CacheDb, ParsedData, VersionedCache};
        use tokio::sync::oneshot;

        let db = CacheDb::open_in_memory().await.unwrap();
        let cache: Arc<VersionedCache<String, String, String>> = Arc::new(VersionedCache::client(
            "results",
            Arc::new(db),
            10,
            |_: &String| ParsedData::skip(),
        ));
        let guard = RequestGuard::new();
        let (release, gate) = oneshot::channel::<()>();

        let slow = {
            let cache = Arc::clone(&cache);
            let ticket = guard.begin();
            tokio::spawn(async move {
                let fetch = || async move {
                    gate.await.ok();
                    Ok("january".to_string())
                };
                let resp = cache.get_or_fetch(&"jan".to_string(), &"v1".to_string(), fetch).await.unwrap();
                ticket.accept(resp)
            })
        };

        // The requester switches filters before the first answer lands.
        let ticket = guard.begin();
        let resp = cache
            .get_or_fetch(&"feb".to_string(), &"v1".to_string(), || async { Ok("february".to_string()) })
            .await
            .unwrap();
        assert_eq!(ticket.accept(resp), Some("february".to_string()));

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), None);
    }
}
