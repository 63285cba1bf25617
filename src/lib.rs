pub mod cache;
pub mod config;
pub mod database;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod http_cache;
pub mod observability;
pub mod query;
pub mod service;
pub mod types;

pub use cache::{CacheStore, InvalidationListener, MemoryCacheStore, RedisCacheStore};
pub use config::Config;
pub use database::{DocumentStore, MemoryDocumentStore, PostgresDocumentStore};
pub use error::{CacheError, CacheResult};
pub use filter::Filter;
pub use http_cache::{HttpFetcher, HttpResponseCache, ReqwestFetcher};
pub use query::QueryExecutor;
pub use service::DocumentCache;
pub use types::*;
