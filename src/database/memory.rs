use super::DocumentStore;
use crate::error::{CacheError, CacheResult};
use crate::filter::{lookup, sort_order, Filter};
use crate::types::{document_id, CountOptions, Document, FindOneOptions, FindOptions, Sort, SortOrder};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// In-process document store with the filter semantics of the Postgres store.
///
/// Documents keep insertion order, which is also the tie-break order when
/// sorting. Every `find_many` call is recorded so callers can assert on the
/// exact queries that reached the store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    find_many_calls: Mutex<Vec<(String, Filter)>>,
    find_one_calls: AtomicUsize,
    count_calls: AtomicUsize,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document by id
    pub async fn upsert(&self, collection: &str, doc: Document) -> CacheResult<String> {
        let id = document_id(&doc)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        match docs.iter_mut().find(|existing| document_id(existing).ok().as_deref() == Some(id.as_str())) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        Ok(id)
    }

    /// Delete a document by id; returns whether it existed
    pub async fn delete(&self, collection: &str, id: &str) -> bool {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|doc| document_id(doc).ok().as_deref() != Some(id));
        docs.len() != before
    }

    /// Filters passed to `find_many`, oldest first
    pub async fn find_many_calls(&self) -> Vec<(String, Filter)> {
        self.find_many_calls.lock().await.clone()
    }

    pub fn find_one_calls(&self) -> usize {
        self.find_one_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(AtomicOrdering::SeqCst)
    }

    /// Total number of calls of any kind
    pub async fn total_calls(&self) -> usize {
        self.find_many_calls.lock().await.len() + self.find_one_calls() + self.count_calls()
    }

    /// Simulate an outage: every query fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, AtomicOrdering::SeqCst);
    }

    /// Delay every query, e.g. to trip caller deadlines
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, AtomicOrdering::SeqCst);
    }

    async fn before_query(&self) -> CacheResult<()> {
        let latency = self.latency_ms.load(AtomicOrdering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(CacheError::DocumentStore("memory document store unavailable".to_string()));
        }
        Ok(())
    }

    async fn select(&self, collection: &str, filter: &Filter, sort: &Sort) -> CacheResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let mut matched = Vec::new();
        for doc in collections.get(collection).into_iter().flatten() {
            if filter.matches(doc)? {
                matched.push(doc.clone());
            }
        }
        if !sort.is_empty() {
            matched.sort_by(|a, b| compare_documents(a, b, sort));
        }
        Ok(matched)
    }
}

fn compare_documents(a: &Document, b: &Document, sort: &Sort) -> Ordering {
    for (path, order) in &sort.0 {
        let ordering = sort_order(lookup(a, path), lookup(b, path));
        let ordering = match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn window<T>(items: Vec<T>, skip: Option<u64>, limit: Option<u64>) -> Vec<T> {
    let skip = skip.unwrap_or(0) as usize;
    let limit = limit.map_or(usize::MAX, |l| l as usize);
    items.into_iter().skip(skip).take(limit).collect()
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_many(&self, collection: &str, filter: &Filter, options: Option<&FindOptions>) -> CacheResult<Vec<Document>> {
        self.find_many_calls
            .lock()
            .await
            .push((collection.to_string(), filter.clone()));
        self.before_query().await?;

        let options = options.cloned().unwrap_or_default();
        let matched = self.select(collection, filter, &options.sort).await?;
        Ok(window(matched, options.skip, options.limit))
    }

    async fn find_one(&self, collection: &str, filter: &Filter, options: Option<&FindOneOptions>) -> CacheResult<Document> {
        self.find_one_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.before_query().await?;

        let options = options.cloned().unwrap_or_default();
        let matched = self.select(collection, filter, &options.sort).await?;
        window(matched, options.skip, Some(1))
            .into_iter()
            .next()
            .ok_or(CacheError::NotFound)
    }

    async fn count(&self, collection: &str, filter: &Filter, options: Option<&CountOptions>) -> CacheResult<i64> {
        self.count_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.before_query().await?;

        let options = options.cloned().unwrap_or_default();
        let matched = self.select(collection, filter, &Sort::default()).await?;
        Ok(window(matched, options.skip, options.limit).len() as i64)
    }

    async fn health_check(&self) -> CacheResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(CacheError::DocumentStore("memory document store unavailable".to_string()));
        }
        Ok(())
    }
}
