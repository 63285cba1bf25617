/// Common-index invalidation over pub/sub
///
/// Writers that do not hold a cache-store handle publish the name of a common
/// index on [`INVALIDATION_CHANNEL`]; the listener applies the invalidation.
/// Redis pub/sub is at-most-once, so a lost message leaves entries to expire
/// through their TTL.

use super::{CacheStore, INVALIDATION_CHANNEL};
use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use fred::{
    clients::RedisClient,
    interfaces::{ClientLike, EventInterface, PubsubInterface},
    types::{Builder, RedisConfig as FredRedisConfig},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Subscriber applying invalidation messages to a cache store
pub struct InvalidationListener {
    subscriber: RedisClient,
    store: Arc<dyn CacheStore>,
}

impl InvalidationListener {
    /// Open a dedicated subscriber connection
    pub async fn connect(config: &RedisConfig, store: Arc<dyn CacheStore>) -> CacheResult<Self> {
        let redis_config = FredRedisConfig::from_url(&config.url)
            .map_err(|e| CacheError::CacheStore(format!("Invalid Redis URL: {}", e)))?;

        let timeout_secs = config.connection_timeout_secs;
        let subscriber = Builder::from_config(redis_config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = Duration::from_secs(timeout_secs);
            })
            .build()
            .map_err(|e| CacheError::CacheStore(format!("Failed to create subscriber: {}", e)))?;

        let _ = subscriber.connect();
        subscriber
            .wait_for_connect()
            .await
            .map_err(|e| CacheError::CacheStore(format!("Subscriber connection timeout: {}", e)))?;

        Ok(InvalidationListener { subscriber, store })
    }

    /// Consume invalidation messages until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> CacheResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut messages = self.subscriber.message_rx();
        self.subscriber
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to subscribe: {}", e)))?;
        info!("Listening for invalidations on {}", INVALIDATION_CHANNEL);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Invalidation listener shutting down");
                    break;
                }
                received = messages.recv() => match received {
                    Ok(message) => match message.value.as_string() {
                        Some(common_index) => {
                            if let Err(e) = apply_invalidation(self.store.as_ref(), &common_index).await {
                                warn!("Failed to apply invalidation for {}: {}", common_index, e);
                            }
                        }
                        None => warn!("Ignoring non-text invalidation message on {}", message.channel),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Invalidation listener lagged, {} messages skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        return Err(CacheError::CacheStore("Invalidation stream closed".to_string()));
                    }
                },
            }
        }

        let _ = self.subscriber.quit().await;
        Ok(())
    }
}

/// Apply one invalidation message
pub async fn apply_invalidation(store: &dyn CacheStore, common_index: &str) -> CacheResult<u64> {
    let common_index = common_index.trim();
    if common_index.is_empty() {
        debug!("Ignoring empty invalidation message");
        return Ok(0);
    }
    store.invalidate(common_index).await
}

/// Ask every listener to invalidate `common_index`
pub async fn publish_invalidation(store: &dyn CacheStore, common_index: &str) -> CacheResult<u64> {
    store.publish(INVALIDATION_CHANNEL, common_index).await
}
