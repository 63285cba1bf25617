use super::{common_index_key, document_key, query_key, CacheStore, QueryResult};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// In-process cache store with the same key layout as [`super::RedisCacheStore`].
///
/// Expiry uses tokio's clock, so tests running with a paused runtime can
/// advance past TTLs without sleeping.
#[derive(Debug)]
pub struct MemoryCacheStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, String>>,
    index_sets: HashMap<String, HashSet<String>>,
    published: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        Entry { value, expires_at }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

impl MemoryState {
    fn read(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.values.get(key) {
            Some(entry) if entry.is_live() => Some(entry.value.clone()),
            Some(_) => {
                self.values.remove(key);
                None
            }
            None => None,
        }
    }

    fn read_string(&mut self, key: &str) -> Option<String> {
        self.read(key).and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        MemoryCacheStore {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every operation, to exercise callers' deadlines
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of query keys currently tagged with `common_index`
    pub async fn index_len(&self, common_index: &str) -> usize {
        self.state
            .lock()
            .await
            .index_sets
            .get(&common_index_key(common_index))
            .map_or(0, HashSet::len)
    }

    /// Messages published so far, oldest first
    pub async fn published(&self) -> Vec<(String, String)> {
        self.state.lock().await.published.clone()
    }

    /// Whether a live value exists under `key`
    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.lock().await.read(key).is_some()
    }

    async fn before_op(&self) -> CacheResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::CacheStore("memory cache store unavailable".to_string()))
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_query_result(&self, collection: &str, fingerprint: &str) -> CacheResult<Option<QueryResult>> {
        self.before_op().await?;
        let mut state = self.state.lock().await;

        let Some(raw) = state.read_string(&query_key(collection, fingerprint)) else {
            return Ok(None);
        };
        let ids: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| CacheError::CacheStore(format!("Corrupt id list: {}", e)))?;

        let mut bodies = HashMap::new();
        for id in &ids {
            if let Some(body) = state.read_string(&document_key(collection, id)) {
                bodies.insert(id.clone(), body);
            }
        }

        Ok(Some(QueryResult { ids, bodies }))
    }

    async fn set_query_result(
        &self,
        collection: &str,
        fingerprint: &str,
        common_index: &str,
        ids: &[String],
        bodies: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        self.before_op().await?;
        let id_list = serde_json::to_vec(ids)?;
        let key = query_key(collection, fingerprint);

        let mut state = self.state.lock().await;
        state.values.insert(key.clone(), Entry::new(id_list, ttl));
        for (id, body) in bodies {
            state
                .values
                .insert(document_key(collection, id), Entry::new(body.clone().into_bytes(), ttl));
        }
        if !common_index.is_empty() {
            let MemoryState { values, index_sets, .. } = &mut *state;
            let members = index_sets.entry(common_index_key(common_index)).or_default();
            // Expired query keys no longer need invalidating
            members.retain(|member| values.get(member).is_some_and(Entry::is_live));
            members.insert(key);
        }

        debug!("Stored {} ids and {} bodies for {}", ids.len(), bodies.len(), fingerprint);
        Ok(())
    }

    async fn invalidate(&self, common_index: &str) -> CacheResult<u64> {
        self.before_op().await?;
        let mut state = self.state.lock().await;

        let keys = state.index_sets.remove(&common_index_key(common_index)).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if state.values.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn evict_documents(&self, collection: &str, ids: &[String]) -> CacheResult<u64> {
        self.before_op().await?;
        let mut state = self.state.lock().await;
        let removed = ids
            .iter()
            .filter(|id| state.values.remove(&document_key(collection, id)).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.before_op().await?;
        Ok(self.state.lock().await.read(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.before_op().await?;
        self.state.lock().await.values.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.before_op().await?;
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).and_then(|hash| hash.get(field)).cloned())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        self.before_op().await?;
        self.state
            .lock()
            .await
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.before_op().await?;
        self.state
            .lock()
            .await
            .published
            .push((channel.to_string(), message.to_string()));
        Ok(0)
    }

    async fn health_check(&self) -> CacheResult<()> {
        self.before_op().await
    }
}
