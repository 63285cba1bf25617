use std::env;
use std::str::FromStr;
use std::time::Duration;
use crate::error::{CacheError, CacheResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis configuration
    pub redis: RedisConfig,
    /// Document database configuration
    pub database: DatabaseConfig,
    /// Query cache behaviour
    pub cache: CachePolicy,
    /// Outbound HTTP configuration
    pub http: HttpConfig,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Maximum Redis connections
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
}

/// Document database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// Maximum database connections
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Per-statement timeout in milliseconds
    pub statement_timeout_ms: u64,
}

/// TTLs and deadlines used by the query executor
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// TTL of query-result entries and document bodies in seconds
    pub query_ttl_secs: u64,
    /// TTL of cached collection sizes in seconds
    pub collection_size_ttl_secs: u64,
    /// Deadline for a single cache-store or document-store call in milliseconds
    pub operation_timeout_ms: u64,
}

impl CachePolicy {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }

    pub fn collection_size_ttl(&self) -> Duration {
        Duration::from_secs(self.collection_size_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            query_ttl_secs: 3600, // 1 hour
            collection_size_ttl_secs: 300, // 5 minutes
            operation_timeout_ms: 2000,
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            request_timeout_secs: 10,
            user_agent: concat!("docstore-cache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn parse_var<T>(name: &str, default: &str) -> CacheResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| CacheError::Config(format!("Invalid {}: {}", name, e)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> CacheResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::warn!("Could not load .env file: {}", e);
        }

        let defaults = Config::default();

        let config = Config {
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .map_err(|_| CacheError::Config("REDIS_URL is required".to_string()))?,
                max_connections: parse_var("REDIS_MAX_CONNECTIONS", "10")?,
                connection_timeout_secs: parse_var("REDIS_CONNECTION_TIMEOUT_SECS", "5")?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .map_err(|_| CacheError::Config("DATABASE_URL is required".to_string()))?,
                max_connections: parse_var("DB_MAX_CONNECTIONS", "10")?,
                connection_timeout_secs: parse_var("DB_CONNECTION_TIMEOUT_SECS", "30")?,
                statement_timeout_ms: parse_var("DB_STATEMENT_TIMEOUT_MS", "1000")?,
            },
            cache: CachePolicy {
                query_ttl_secs: parse_var("CACHE_QUERY_TTL_SECS", "3600")?,
                collection_size_ttl_secs: parse_var("CACHE_COLLECTION_SIZE_TTL_SECS", "300")?,
                operation_timeout_ms: parse_var("CACHE_OPERATION_TIMEOUT_MS", "2000")?,
            },
            http: HttpConfig {
                request_timeout_secs: parse_var("HTTP_REQUEST_TIMEOUT_SECS", "10")?,
                user_agent: env::var("HTTP_USER_AGENT").unwrap_or(defaults.http.user_agent),
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> CacheResult<()> {
        // Validate Redis config
        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(CacheError::Config("REDIS_URL must start with redis:// or rediss://".to_string()));
        }

        if self.redis.max_connections == 0 {
            return Err(CacheError::Config("REDIS_MAX_CONNECTIONS must be greater than 0".to_string()));
        }

        // Validate database config
        if !self.database.url.starts_with("postgres://") && !self.database.url.starts_with("postgresql://") {
            return Err(CacheError::Config("DATABASE_URL must start with postgres:// or postgresql://".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(CacheError::Config("DB_MAX_CONNECTIONS must be greater than 0".to_string()));
        }

        // Validate cache policy
        if self.cache.query_ttl_secs == 0 || self.cache.collection_size_ttl_secs == 0 {
            return Err(CacheError::Config("Cache TTLs must be greater than 0".to_string()));
        }

        if self.cache.operation_timeout_ms == 0 {
            return Err(CacheError::Config("Operation timeout must be greater than 0".to_string()));
        }

        if self.http.request_timeout_secs == 0 {
            return Err(CacheError::Config("HTTP request timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            redis: RedisConfig {
                url: "".to_string(),
                max_connections: 10,
                connection_timeout_secs: 5,
            },
            database: DatabaseConfig {
                url: "".to_string(),
                max_connections: 10,
                connection_timeout_secs: 30,
                statement_timeout_ms: 1000,
            },
            cache: CachePolicy::default(),
            http: HttpConfig::default(),
        }
    }
}
