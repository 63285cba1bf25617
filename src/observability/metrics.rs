use prometheus::{
    Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use crate::error::{CacheError, CacheResult};

/// Prometheus metrics registry and collectors
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

/// All cache metrics
pub struct Metrics {
    // Query cache metrics
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    pub cache_partial_hits_total: Counter,
    pub documents_backfilled_total: Counter,
    pub cache_store_errors_total: Counter,

    // HTTP response cache metrics
    pub http_cache_hits_total: Counter,
    pub http_cache_misses_total: Counter,

    // Document store metrics
    pub document_store_query_duration_seconds: Histogram,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all collectors
    pub fn new() -> CacheResult<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);

        Ok(Self {
            registry,
            metrics,
        })
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> CacheResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)
            .map_err(|e| CacheError::Internal(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| CacheError::Internal(format!("Failed to convert metrics to string: {}", e)))
    }

    /// Get the underlying registry for exporters
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> CacheResult<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| CacheError::Internal(format!("Failed to create {} metric: {}", name, e)))?;
    registry.register(Box::new(counter.clone()))
        .map_err(|e| CacheError::Internal(format!("Failed to register {}: {}", name, e)))?;
    Ok(counter)
}

impl Metrics {
    fn new(registry: &Registry) -> CacheResult<Self> {
        let document_store_query_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "document_store_query_duration_seconds",
            "Duration of document store queries in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]))
        .map_err(|e| CacheError::Internal(format!("Failed to create document_store_query_duration_seconds metric: {}", e)))?;
        registry.register(Box::new(document_store_query_duration_seconds.clone()))
            .map_err(|e| CacheError::Internal(format!("Failed to register document_store_query_duration_seconds: {}", e)))?;

        Ok(Self {
            cache_hits_total: counter(registry, "cache_hits_total", "Query cache lookups served entirely from cache")?,
            cache_misses_total: counter(registry, "cache_misses_total", "Query cache lookups with no cached entry")?,
            cache_partial_hits_total: counter(registry, "cache_partial_hits_total", "Query cache lookups missing some document bodies")?,
            documents_backfilled_total: counter(registry, "documents_backfilled_total", "Document bodies re-fetched to repair partial hits")?,
            cache_store_errors_total: counter(registry, "cache_store_errors_total", "Cache store failures absorbed by the read path")?,
            http_cache_hits_total: counter(registry, "http_cache_hits_total", "Outbound GETs served from cache")?,
            http_cache_misses_total: counter(registry, "http_cache_misses_total", "Outbound GETs sent to the origin")?,
            document_store_query_duration_seconds,
        })
    }
}

/// Timer helper for measuring durations
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn observe(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}
