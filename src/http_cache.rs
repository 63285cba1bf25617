/// HTTP response cache
///
/// Caches third-party GET responses in the cache store. Successful responses
/// (status in [200, 400)) are kept for the caller's success TTL; other
/// statuses are remembered as errors for the error TTL so a failing endpoint
/// is not hammered. Transport failures are never cached.
///
/// Identical concurrent requests collapse into one outbound call through a
/// per-URI lock; requests for different URIs proceed in parallel.

use crate::cache::{http_get_key, CacheStore};
use crate::config::{CachePolicy, HttpConfig};
use crate::error::{CacheError, CacheResult};
use crate::observability::MetricsRegistry;
use crate::types::{CachedResponse, Header};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SUCCESS_TAG: u8 = b'+';
const ERROR_TAG: u8 = b'-';

/// Performs the outbound GET
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, uri: &str, headers: &[Header]) -> CacheResult<CachedResponse>;
}

/// `reqwest`-backed fetcher
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(config: &HttpConfig) -> CacheResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CacheError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, uri: &str, headers: &[Header]) -> CacheResult<CachedResponse> {
        let mut request = self.client.get(uri);
        for header in headers {
            request = request.header(header.key.as_str(), header.value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CacheError::Http(format!("GET {} failed: {}", uri, e)))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CacheError::Http(format!("Reading body of {} failed: {}", uri, e)))?;
            body.extend_from_slice(&chunk);
        }

        Ok(CachedResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Holds a per-key lock entry and removes it once no other caller uses it
struct InFlight<'a> {
    locks: &'a LockMap,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn new(locks: &'a LockMap, key: &'a str) -> Self {
        let lock = locks.entry(key.to_string()).or_default().clone();
        Self { locks, key, lock }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours
        self.locks.remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Read-through cache for outbound GETs
pub struct HttpResponseCache {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn HttpFetcher>,
    locks: LockMap,
    metrics: MetricsRegistry,
    operation_timeout: Duration,
}

impl HttpResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn HttpFetcher>, metrics: MetricsRegistry) -> Self {
        Self {
            store,
            fetcher,
            locks: DashMap::new(),
            metrics,
            operation_timeout: CachePolicy::default().operation_timeout(),
        }
    }

    /// Deadline applied to each cache store call
    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(format!("{} exceeded {:?}", operation, self.operation_timeout)))?
    }

    /// GET `uri`, serving from cache when possible.
    ///
    /// An `error_ttl` of zero disables caching of error statuses.
    pub async fn get(
        &self,
        uri: &str,
        success_ttl: Duration,
        error_ttl: Duration,
        headers: &[Header],
    ) -> CacheResult<CachedResponse> {
        let key = http_get_key(&uri_digest(uri));

        let in_flight = InFlight::new(&self.locks, &key);
        let _guard = in_flight.lock.lock().await;

        match self.with_deadline("cache get", self.store.get(&key)).await {
            Ok(Some(raw)) => match decode_entry(&raw) {
                Some(response) => {
                    debug!("HTTP cache hit for {}", uri);
                    self.metrics.metrics.http_cache_hits_total.inc();
                    return Ok(response);
                }
                None => warn!("Ignoring corrupt HTTP cache entry {}", key),
            },
            Ok(None) => {}
            Err(e) => {
                self.metrics.metrics.cache_store_errors_total.inc();
                warn!("HTTP cache lookup failed, fetching {}: {}", uri, e);
            }
        }

        debug!("HTTP cache miss for {}", uri);
        self.metrics.metrics.http_cache_misses_total.inc();
        let response = self.fetcher.get(uri, headers).await?;

        let entry = if response.is_success() {
            Some((encode_entry(SUCCESS_TAG, response.status, &response.body), success_ttl))
        } else if !error_ttl.is_zero() {
            Some((encode_entry(ERROR_TAG, response.status, &[]), error_ttl))
        } else {
            None
        };

        if let Some((value, ttl)) = entry {
            if let Err(e) = self.with_deadline("cache set", self.store.set(&key, value, ttl)).await {
                self.metrics.metrics.cache_store_errors_total.inc();
                warn!("Failed to cache response of {}: {}", uri, e);
            }
        }

        Ok(response)
    }

    /// Number of URIs with a request in progress or waiting
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

/// Hex SHA-256 of the URI
pub fn uri_digest(uri: &str) -> String {
    hex::encode(Sha256::digest(uri.as_bytes()))
}

/// Entry layout: tag byte, three status digits, body
fn encode_entry(tag: u8, status: u16, body: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + body.len());
    value.push(tag);
    value.extend_from_slice(format!("{:03}", status).as_bytes());
    value.extend_from_slice(body);
    value
}

fn decode_entry(raw: &[u8]) -> Option<CachedResponse> {
    let (&tag, rest) = raw.split_first()?;
    if rest.len() < 3 {
        return None;
    }
    let (digits, body) = rest.split_at(3);
    let status: u16 = std::str::from_utf8(digits).ok()?.parse().ok()?;

    let body = match tag {
        SUCCESS_TAG => body.to_vec(),
        ERROR_TAG => Vec::new(),
        _ => return None,
    };

    Some(CachedResponse {
        status,
        headers: HashMap::new(),
        body,
        from_cache: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Fetcher returning a fixed status and counting calls
    struct MockFetcher {
        status: std::sync::Mutex<Option<u16>>,
        calls: AtomicUsize,
        latency: Duration,
        seen_headers: std::sync::Mutex<Vec<Header>>,
    }

    impl MockFetcher {
        fn new(status: Option<u16>) -> Arc<Self> {
            Self::with_latency(status, Duration::ZERO)
        }

        fn with_latency(status: Option<u16>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                status: std::sync::Mutex::new(status),
                calls: AtomicUsize::new(0),
                latency,
                seen_headers: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_status(&self, status: Option<u16>) {
            *self.status.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl HttpFetcher for MockFetcher {
        async fn get(&self, uri: &str, headers: &[Header]) -> CacheResult<CachedResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_headers.lock().unwrap().extend_from_slice(headers);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let status = *self.status.lock().unwrap();
            match status {
                Some(status) => Ok(CachedResponse {
                    status,
                    headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
                    body: format!("body of {}", uri).into_bytes(),
                    from_cache: false,
                }),
                None => Err(CacheError::Http("connection refused".to_string())),
            }
        }
    }

    fn cache_with(fetcher: Arc<MockFetcher>) -> HttpResponseCache {
        HttpResponseCache::new(Arc::new(MemoryCacheStore::new()), fetcher, MetricsRegistry::new().unwrap())
    }

    const URI: &str = "https://api.example.com/emotes?page=1";

    #[tokio::test]
    async fn test_success_is_cached() {
        let fetcher = MockFetcher::new(Some(200));
        let cache = cache_with(fetcher.clone());
        let headers = [Header::new("Authorization", "Bearer abc")];

        let first = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &headers).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.headers["content-type"], "text/plain");

        let second = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &headers).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.status, 200);
        assert_eq!(second.body, first.body);
        assert!(second.headers.is_empty());

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(*fetcher.seen_headers.lock().unwrap(), headers.to_vec());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_redirect_status_is_a_success() {
        let fetcher = MockFetcher::new(Some(302));
        let cache = cache_with(fetcher.clone());

        let _ = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]).await.unwrap();
        let cached = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]).await.unwrap();

        assert!(cached.from_cache);
        assert_eq!(cached.status, 302);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_is_cached_for_error_ttl() {
        let fetcher = MockFetcher::new(Some(500));
        let cache = cache_with(fetcher.clone());
        let error_ttl = Duration::from_secs(5);

        let first = cache.get(URI, Duration::from_secs(60), error_ttl, &[]).await.unwrap();
        assert_eq!(first.status, 500);
        assert!(!first.from_cache);

        tokio::time::advance(Duration::from_secs(4)).await;
        let cached = cache.get(URI, Duration::from_secs(60), error_ttl, &[]).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.status, 500);
        assert!(cached.body.is_empty());
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        fetcher.set_status(Some(200));
        let recovered = cache.get(URI, Duration::from_secs(60), error_ttl, &[]).await.unwrap();
        assert!(!recovered.from_cache);
        assert_eq!(recovered.status, 200);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_error_ttl_disables_negative_caching() {
        let fetcher = MockFetcher::new(Some(503));
        let cache = cache_with(fetcher.clone());

        for _ in 0..3 {
            let response = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]).await.unwrap();
            assert!(!response.from_cache);
        }
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_cached() {
        let fetcher = MockFetcher::new(None);
        let cache = cache_with(fetcher.clone());

        assert_err!(cache.get(URI, Duration::from_secs(60), Duration::from_secs(60), &[]).await);
        fetcher.set_status(Some(200));
        assert_ok!(cache.get(URI, Duration::from_secs(60), Duration::from_secs(60), &[]).await);

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_collapse() {
        let fetcher = MockFetcher::with_latency(Some(200), Duration::from_millis(100));
        let cache = cache_with(fetcher.clone());

        let requests = (0..5).map(|_| cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]));
        let responses = futures::future::join_all(requests).await;

        assert_eq!(fetcher.calls(), 1);
        let from_cache = responses
            .into_iter()
            .map(|r| r.unwrap().from_cache)
            .filter(|hit| *hit)
            .count();
        assert_eq!(from_cache, 4);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_uris_do_not_wait_on_each_other() {
        let fetcher = MockFetcher::with_latency(Some(200), Duration::from_millis(100));
        let cache = cache_with(fetcher.clone());

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            cache.get("https://a.example.com", Duration::from_secs(60), Duration::ZERO, &[]),
            cache.get("https://b.example.com", Duration::from_secs(60), Duration::ZERO, &[]),
        );
        assert_ok!(a);
        assert_ok!(b);
        assert_eq!(fetcher.calls(), 2);
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_cache_outage_still_fetches() {
        let fetcher = MockFetcher::new(Some(200));
        let store = Arc::new(MemoryCacheStore::new());
        store.set_available(false);
        let cache = HttpResponseCache::new(store, fetcher.clone(), MetricsRegistry::new().unwrap());

        let response = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(cache.metrics.metrics.cache_store_errors_total.get(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_is_bounded_by_deadline() {
        let fetcher = MockFetcher::new(Some(200));
        let store = Arc::new(MemoryCacheStore::new());
        store.set_latency(Duration::from_secs(30));
        let cache = HttpResponseCache::new(store, fetcher.clone(), MetricsRegistry::new().unwrap())
            .with_operation_timeout(Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        let response = cache.get(URI, Duration::from_secs(60), Duration::ZERO, &[]).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(fetcher.calls(), 1);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(cache.metrics.metrics.cache_store_errors_total.get(), 2.0);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_entry_layout() {
        let success = encode_entry(SUCCESS_TAG, 200, b"hello");
        assert_eq!(success, b"+200hello".to_vec());
        let decoded = decode_entry(&success).unwrap();
        assert_eq!(decoded.body, b"hello".to_vec());

        let error = decode_entry(&encode_entry(ERROR_TAG, 404, b"ignored")).unwrap();
        assert_eq!(error.status, 404);
        assert!(error.body.is_empty());

        assert!(decode_entry(b"").is_none());
        assert!(decode_entry(b"+20").is_none());
        assert!(decode_entry(b"?200body").is_none());
    }

    #[test]
    fn test_uri_digest_is_stable_hex() {
        let digest = uri_digest(URI);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, uri_digest(URI));
        assert_ne!(digest, uri_digest("https://api.example.com/emotes?page=2"));
    }
}
