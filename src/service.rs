use std::sync::Arc;
use tracing::info;

use crate::cache::{publish_invalidation, CacheStore, InvalidationListener, RedisCacheStore};
use crate::config::Config;
use crate::database::{DocumentStore, PostgresDocumentStore};
use crate::error::CacheResult;
use crate::http_cache::{HttpResponseCache, ReqwestFetcher};
use crate::observability::{HealthChecker, MetricsRegistry};
use crate::query::QueryExecutor;

/// Everything a process needs to read through the cache, wired from one config
pub struct DocumentCache {
    pub config: Config,
    pub queries: QueryExecutor,
    pub http: HttpResponseCache,
    pub health: HealthChecker,
    pub metrics: MetricsRegistry,
    cache: Arc<dyn CacheStore>,
}

impl DocumentCache {
    /// Connect to Redis and Postgres
    pub async fn connect(config: Config) -> CacheResult<Self> {
        let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::new(config.redis.clone()).await?);
        let documents: Arc<dyn DocumentStore> = Arc::new(PostgresDocumentStore::new(config.database.clone()).await?);
        let cache = Self::from_parts(config, cache, documents)?;
        info!("Document cache ready");
        Ok(cache)
    }

    /// Wire the components around existing stores
    pub fn from_parts(
        config: Config,
        cache: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> CacheResult<Self> {
        let metrics = MetricsRegistry::new()?;
        let fetcher = Arc::new(ReqwestFetcher::new(&config.http)?);

        Ok(Self {
            queries: QueryExecutor::new(cache.clone(), documents.clone(), config.cache.clone(), metrics.clone()),
            http: HttpResponseCache::new(cache.clone(), fetcher, metrics.clone())
                .with_operation_timeout(config.cache.operation_timeout()),
            health: HealthChecker::new(cache.clone(), documents),
            metrics,
            config,
            cache,
        })
    }

    /// Listener applying invalidations published by other processes
    pub async fn invalidation_listener(&self) -> CacheResult<InvalidationListener> {
        InvalidationListener::connect(&self.config.redis, self.cache.clone()).await
    }

    /// Ask every process sharing the cache store to drop `common_index`
    pub async fn broadcast_invalidation(&self, common_index: &str) -> CacheResult<u64> {
        publish_invalidation(self.cache.as_ref(), common_index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheStore, INVALIDATION_CHANNEL};
    use crate::database::MemoryDocumentStore;
    use crate::filter::Filter;
    use crate::observability::HealthStatus;
    use serde_json::json;

    #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
    struct Item {
        #[serde(rename = "_id")]
        id: String,
        label: String,
    }

    #[tokio::test]
    async fn test_wires_memory_stores() {
        let cache = Arc::new(MemoryCacheStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .upsert("items", json!({"_id": "1", "label": "first"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let service = DocumentCache::from_parts(Config::default(), cache.clone(), documents).unwrap();

        let items: Vec<Item> = service.queries.find("items", "items", &Filter::new(), None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "first");

        assert_eq!(service.health.check().await.status, HealthStatus::Healthy);
        assert!(service.metrics.gather().unwrap().contains("cache_misses_total 1"));

        service.broadcast_invalidation("items").await.unwrap();
        assert_eq!(cache.published().await, vec![(INVALIDATION_CHANNEL.to_string(), "items".to_string())]);
    }
}
