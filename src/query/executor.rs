use crate::cache::{collection_size_key, CacheStore, QueryResult};
use crate::config::CachePolicy;
use crate::database::DocumentStore;
use crate::decoder::{decode_many, decode_one};
use crate::error::{CacheError, CacheResult};
use crate::filter::Filter;
use crate::fingerprint::{fingerprint, OpKind};
use crate::observability::{MetricsRegistry, Timer};
use crate::types::{document_id, CountOptions, Document, FindOneOptions, FindOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Serves finds through the cache store, falling back to the document store
pub struct QueryExecutor {
    cache: Arc<dyn CacheStore>,
    documents: Arc<dyn DocumentStore>,
    policy: CachePolicy,
    metrics: MetricsRegistry,
}

impl QueryExecutor {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
        policy: CachePolicy,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            cache,
            documents,
            policy,
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Find every document matching `filter`, in the order the document
    /// store returned them when the result was first cached.
    ///
    /// `common_index` tags the cached result for group invalidation; pass an
    /// empty string for none.
    pub async fn find<T>(
        &self,
        collection: &str,
        common_index: &str,
        filter: &Filter,
        options: Option<&FindOptions>,
    ) -> CacheResult<Vec<T>>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let fp = fingerprint(OpKind::Find, collection, filter, options)?;

        let docs = match self.lookup(collection, &fp).await {
            Some(cached) => self.resolve(collection, &fp, common_index, cached).await?,
            None => {
                debug!("Cache miss for find on {} ({})", collection, fp);
                self.metrics.metrics.cache_misses_total.inc();
                self.populate(collection, &fp, common_index, filter, options).await?
            }
        };

        decode_many(&docs)
    }

    /// Find the first document matching `filter`.
    ///
    /// Fails with [`CacheError::NotFound`] when nothing matches; that outcome
    /// is never cached.
    pub async fn find_one<T>(
        &self,
        collection: &str,
        common_index: &str,
        filter: &Filter,
        options: Option<&FindOneOptions>,
    ) -> CacheResult<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let fp = fingerprint(OpKind::FindOne, collection, filter, options)?;

        let cached = match self.lookup(collection, &fp).await {
            Some(cached) if !cached.ids.is_empty() => {
                self.resolve(collection, &fp, common_index, cached).await?.into_iter().next()
            }
            _ => None,
        };

        let doc = match cached {
            Some(doc) => doc,
            None => {
                debug!("Cache miss for find_one on {} ({})", collection, fp);
                self.metrics.metrics.cache_misses_total.inc();
                self.populate_one(collection, &fp, common_index, filter, options).await?
            }
        };

        decode_one(&doc)
    }

    /// Count matching documents, cached without invalidation for the
    /// collection-size TTL.
    pub async fn collection_size(
        &self,
        collection: &str,
        filter: &Filter,
        options: Option<&CountOptions>,
    ) -> CacheResult<i64> {
        let fp = fingerprint(OpKind::CollectionSize, collection, filter, options)?;
        let key = collection_size_key(collection, &fp);

        match self.with_deadline("cache get", self.cache.get(&key)).await {
            Ok(Some(raw)) => match parse_count(&raw) {
                Some(count) => {
                    self.metrics.metrics.cache_hits_total.inc();
                    return Ok(count);
                }
                None => error!("Corrupt collection size under {}", key),
            },
            Ok(None) => {}
            Err(e) => self.cache_error("collection size lookup", &e),
        }

        self.metrics.metrics.cache_misses_total.inc();
        let count = self
            .timed("document store count", self.documents.count(collection, filter, options))
            .await?;

        let ttl = self.policy.collection_size_ttl();
        if let Err(e) = self
            .with_deadline("cache set", self.cache.set(&key, count.to_string().into_bytes(), ttl))
            .await
        {
            self.cache_error("collection size write", &e);
        }

        Ok(count)
    }

    /// Drop every cached result tagged with `common_index` from this cache store
    pub async fn invalidate(&self, common_index: &str) -> CacheResult<u64> {
        self.with_deadline("cache invalidate", self.cache.invalidate(common_index)).await
    }

    /// Drop cached bodies of documents that changed
    pub async fn evict_documents(&self, collection: &str, ids: &[String]) -> CacheResult<u64> {
        self.with_deadline("cache evict", self.cache.evict_documents(collection, ids)).await
    }

    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        timeout(self.policy.operation_timeout(), fut)
            .await
            .map_err(|_| CacheError::Timeout(format!("{} exceeded {}ms", operation, self.policy.operation_timeout_ms)))?
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let timer = Timer::new(self.metrics.metrics.document_store_query_duration_seconds.clone());
        let result = self.with_deadline(operation, fut).await;
        timer.observe();
        result
    }

    fn cache_error(&self, operation: &str, e: &CacheError) {
        self.metrics.metrics.cache_store_errors_total.inc();
        warn!("Cache store {} failed, continuing without cache: {}", operation, e);
    }

    /// Cache lookup; failures read as a full miss
    async fn lookup(&self, collection: &str, fp: &str) -> Option<QueryResult> {
        match self
            .with_deadline("cache lookup", self.cache.get_query_result(collection, fp))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.cache_error("lookup", &e);
                None
            }
        }
    }

    /// Cache write; failures are logged and the caller keeps its data
    async fn store(&self, collection: &str, fp: &str, common_index: &str, ids: &[String], bodies: &[(String, String)]) {
        let ttl = self.policy.query_ttl();
        if let Err(e) = self
            .with_deadline(
                "cache write",
                self.cache.set_query_result(collection, fp, common_index, ids, bodies, ttl),
            )
            .await
        {
            self.cache_error("write", &e);
        }
    }

    async fn populate(
        &self,
        collection: &str,
        fp: &str,
        common_index: &str,
        filter: &Filter,
        options: Option<&FindOptions>,
    ) -> CacheResult<Vec<Document>> {
        let docs = self
            .timed("document store find", self.documents.find_many(collection, filter, options))
            .await?;

        let bodies = serialize_documents(&docs)?;
        let ids: Vec<String> = bodies.iter().map(|(id, _)| id.clone()).collect();
        self.store(collection, fp, common_index, &ids, &bodies).await;

        debug!("Cached {} documents for {} ({})", ids.len(), collection, fp);
        Ok(docs)
    }

    async fn populate_one(
        &self,
        collection: &str,
        fp: &str,
        common_index: &str,
        filter: &Filter,
        options: Option<&FindOneOptions>,
    ) -> CacheResult<Document> {
        let doc = self
            .timed("document store find_one", self.documents.find_one(collection, filter, options))
            .await?;

        let bodies = serialize_documents(std::slice::from_ref(&doc))?;
        let ids: Vec<String> = bodies.iter().map(|(id, _)| id.clone()).collect();
        self.store(collection, fp, common_index, &ids, &bodies).await;

        Ok(doc)
    }

    /// Turn a cached entry into documents, re-fetching absent bodies by id
    async fn resolve(
        &self,
        collection: &str,
        fp: &str,
        common_index: &str,
        cached: QueryResult,
    ) -> CacheResult<Vec<Document>> {
        let mut found: HashMap<String, Document> = HashMap::with_capacity(cached.ids.len());
        let mut missing = Vec::new();

        for id in &cached.ids {
            match cached.bodies.get(id) {
                Some(raw) => match serde_json::from_str::<Document>(raw) {
                    Ok(doc) => {
                        found.insert(id.clone(), doc);
                    }
                    Err(e) => {
                        error!("Corrupt cached body for {}:{}, refetching: {}", collection, id, e);
                        missing.push(id.clone());
                    }
                },
                None => missing.push(id.clone()),
            }
        }

        if missing.is_empty() {
            debug!("Cache hit for {} ({})", collection, fp);
            self.metrics.metrics.cache_hits_total.inc();
        } else {
            debug!("Partial cache hit for {} ({}), {} bodies missing", collection, fp, missing.len());
            self.metrics.metrics.cache_partial_hits_total.inc();

            let fetched = self
                .timed(
                    "document store backfill",
                    self.documents.find_many(collection, &Filter::by_ids(&missing), None),
                )
                .await?;
            self.metrics.metrics.documents_backfilled_total.inc_by(fetched.len() as f64);

            let backfill = serialize_documents(&fetched)?;
            if !backfill.is_empty() {
                self.store(collection, fp, common_index, &cached.ids, &backfill).await;
            }
            for (doc, (id, _)) in fetched.into_iter().zip(backfill) {
                found.insert(id, doc);
            }
        }

        let mut docs = Vec::with_capacity(cached.ids.len());
        for id in &cached.ids {
            match found.remove(id) {
                Some(doc) => docs.push(doc),
                None => debug!("Document {}:{} no longer exists, skipping", collection, id),
            }
        }
        Ok(docs)
    }
}

/// Pair every document with its id key and serialized body
fn serialize_documents(docs: &[Document]) -> CacheResult<Vec<(String, String)>> {
    docs.iter()
        .map(|doc| Ok((document_id(doc)?, serde_json::to_string(doc)?)))
        .collect()
}

fn parse_count(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}
