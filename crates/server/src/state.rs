//! Process-wide services shared by every tool call.

use std::sync::Arc;

use panorama_client::{AssetFetcher, FetchConfig as AssetFetchConfig};
use panorama_core::cache::{DurableStore, RedisStore};
use panorama_core::{AppConfig, CacheDb, Error};
use panorama_query::{ConnectionManager, ExecutorProvider, Limits, ResultsService};

pub struct AppState {
    pub results: ResultsService,
    /// Durable client store; `None` when answers are cached in Redis.
    pub client_cache: Option<CacheDb>,
    pub fetcher: AssetFetcher,
}

impl AppState {
    /// Pick the cache variant from configuration.
    ///
    /// A configured Redis URL selects the shared server cache (running
    /// uncached if Redis is unreachable); otherwise answers go to the local
    /// SQLite store behind an in-memory LRU.
    pub async fn from_config(config: &AppConfig, connections: Arc<ConnectionManager>) -> Result<Self, Error> {
        let provider: Arc<dyn ExecutorProvider> = connections;
        let limits = Limits { max_items: config.max_items, max_replicant_options: config.max_replicant_options };

        let (results, client_cache) = match config.redis_url() {
            Some(url) => {
                let store = RedisStore::connect(Some(url))
                    .await
                    .map(|s| Arc::new(s) as Arc<dyn DurableStore>);
                (ResultsService::server(provider, store, &config.cache_prefix, limits), None)
            }
            None => {
                let db = CacheDb::open(&config.client_cache_path).await?;
                tracing::info!(path = %config.client_cache_path.display(), "using local cache store");
                let results =
                    ResultsService::client(provider, Arc::new(db.clone()), config.client_cache_capacity, limits);
                (results, Some(db))
            }
        };

        Ok(Self { results, client_cache, fetcher: AssetFetcher::new(AssetFetchConfig::default())? })
    }

    /// State over an in-memory client store.
    #[cfg(test)]
    pub async fn for_tests(provider: Arc<dyn ExecutorProvider>, limits: Limits) -> Self {
        let db = CacheDb::open_in_memory().await.unwrap();
        Self {
            results: ResultsService::client(provider, Arc::new(db.clone()), 10, limits),
            client_cache: Some(db),
            fetcher: AssetFetcher::new(AssetFetchConfig::default()).unwrap(),
        }
    }
}
