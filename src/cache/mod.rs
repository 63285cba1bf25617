/// Key-value cache store
///
/// This module defines the two-level layout used by the query executor:
/// - Query-result entries: ordered document ids per (collection, fingerprint),
///   tagged with a common index for group invalidation
/// - Document bodies: serialized documents per (collection, id), evictable
///   independently of the entries that reference them
///
/// plus the plain key/value, hash and pub/sub primitives used by the
/// collection-size and HTTP caches.

mod invalidation;
mod memory;
mod redis_client;


use crate::error::CacheResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub use invalidation::{apply_invalidation, publish_invalidation, InvalidationListener};
pub use memory::MemoryCacheStore;
pub use redis_client::RedisCacheStore;

/// Channel carrying common-index names to invalidate
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Cached query result: the id list plus whichever bodies are still present
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Document ids in the order the query returned them
    pub ids: Vec<String>,
    /// Serialized bodies keyed by id; may cover only a subset of `ids`
    pub bodies: HashMap<String, String>,
}

impl QueryResult {
    /// Ids whose body is absent from the cache, in id-list order
    pub fn missing_ids(&self) -> Vec<String> {
        self.ids
            .iter()
            .filter(|id| !self.bodies.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.ids.iter().all(|id| self.bodies.contains_key(id))
    }
}

/// Storage contract consumed by the query executor and the HTTP cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the id list of a query together with the bodies currently cached
    /// for those ids, in one atomic round trip. `None` means no entry exists.
    async fn get_query_result(&self, collection: &str, fingerprint: &str) -> CacheResult<Option<QueryResult>>;

    /// Upsert the id list and write every body, tagging the entry with
    /// `common_index` (empty for none). Either everything is written or nothing.
    async fn set_query_result(
        &self,
        collection: &str,
        fingerprint: &str,
        common_index: &str,
        ids: &[String],
        bodies: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Drop every query-result entry tagged with `common_index`.
    /// Returns the number of entries removed.
    async fn invalidate(&self, common_index: &str) -> CacheResult<u64>;

    /// Drop individual document bodies
    async fn evict_documents(&self, collection: &str, ids: &[String]) -> CacheResult<u64>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CacheResult<()>;

    /// Publish a message; returns the number of receivers
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64>;

    async fn health_check(&self) -> CacheResult<()>;
}

/// Key of a query-result entry
pub fn query_key(collection: &str, fingerprint: &str) -> String {
    format!("cached:{}:query:{}", collection, fingerprint)
}

/// Key prefix of document bodies in a collection
pub fn document_key_prefix(collection: &str) -> String {
    format!("cached:{}:doc:", collection)
}

/// Key of a document body
pub fn document_key(collection: &str, id: &str) -> String {
    format!("{}{}", document_key_prefix(collection), id)
}

/// Key of the set tracking entries tagged with a common index
pub fn common_index_key(common_index: &str) -> String {
    format!("cached:common-index:{}", common_index)
}

/// Key of a cached collection size
pub fn collection_size_key(collection: &str, fingerprint: &str) -> String {
    format!("cached:collection-size:{}:{}", collection, fingerprint)
}

/// Key of a cached outbound GET
pub fn http_get_key(digest: &str) -> String {
    format!("cached:http-get:{}", digest)
}
