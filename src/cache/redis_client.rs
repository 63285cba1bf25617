use super::{common_index_key, document_key, document_key_prefix, query_key, CacheStore, QueryResult};
use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use fred::{
    clients::RedisPool,
    interfaces::{ClientLike, HashesInterface, KeysInterface, LuaInterface, PubsubInterface},
    types::{Builder, Expiration, RedisConfig as FredRedisConfig},
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Reads the id list and every referenced body in one round trip.
/// Missing bodies come back as empty strings; a missing entry as nil.
///
/// Body keys are only known once the id list is read, so they are derived
/// from the prefix in ARGV[1]. This needs a single-node (non-cluster) Redis.
const GET_QUERY_RESULT_SCRIPT: &str = r#"
local ids = redis.call('GET', KEYS[1])
if not ids then
  return false
end
local result = {ids}
local decoded = cjson.decode(ids)
for i = 1, #decoded do
  local body = redis.call('GET', ARGV[1] .. decoded[i])
  if body then
    result[i + 1] = body
  else
    result[i + 1] = ''
  end
end
return result
"#;

/// KEYS: query key, common index set (when ARGV[3] is "1"), then one key per body
/// ARGV: ttl ms, id list, index flag, then the bodies in KEYS order
const SET_QUERY_RESULT_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
redis.call('SET', KEYS[1], ARGV[2], 'PX', ttl)
local first_body = 2
if ARGV[3] == '1' then
  first_body = 3
  redis.call('SADD', KEYS[2], KEYS[1])
  if redis.call('PTTL', KEYS[2]) < ttl then
    redis.call('PEXPIRE', KEYS[2], ttl)
  end
end
local written = 0
for i = first_body, #KEYS do
  redis.call('SET', KEYS[i], ARGV[i + 4 - first_body], 'PX', ttl)
  written = written + 1
end
return written
"#;

/// Deletes the query keys listed in the common index set, then the set.
/// Members span collections, so this also needs a single-node Redis.
const INVALIDATE_SCRIPT: &str = r#"
local members = redis.call('SMEMBERS', KEYS[1])
local removed = 0
for i = 1, #members do
  removed = removed + redis.call('DEL', members[i])
end
redis.call('DEL', KEYS[1])
return removed
"#;

/// Redis-backed cache store with connection pooling
pub struct RedisCacheStore {
    /// Fred Redis client with connection pooling
    client: RedisPool,
    /// Configuration
    config: RedisConfig,
}

impl RedisCacheStore {
    /// Create a new Redis cache store against a single-node (or replicated) deployment
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        info!("Initializing Redis client with URL: {}", crate::observability::sanitize_url_for_logging(&config.url));

        // Create Redis config
        let redis_config = FredRedisConfig::from_url(&config.url)
            .map_err(|e| CacheError::CacheStore(format!("Invalid Redis URL: {}", e)))?;

        // Create the Redis client with proper configuration
        let timeout_secs = config.connection_timeout_secs;
        let client = Builder::from_config(redis_config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = Duration::from_secs(timeout_secs);
            })
            .with_performance_config(|perf_config| {
                perf_config.auto_pipeline = true;
                perf_config.default_command_timeout = Duration::from_secs(timeout_secs);
            })
            .build_pool(config.max_connections as usize)
            .map_err(|e| CacheError::CacheStore(format!("Failed to create Redis pool: {}", e)))?;

        // Connect to Redis
        let _ = client.connect();

        // Wait for connection to be ready
        client
            .wait_for_connect()
            .await
            .map_err(|e| CacheError::CacheStore(format!("Redis connection timeout: {}", e)))?;

        info!("Redis client connected successfully");

        Ok(RedisCacheStore { client, config })
    }

    /// Configuration the store was created with
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Pair the id list returned by the lookup script with the bodies that follow it
fn parse_query_result(reply: Vec<String>) -> CacheResult<QueryResult> {
    let mut values = reply.into_iter();
    let raw_ids = values
        .next()
        .ok_or_else(|| CacheError::CacheStore("Empty query result reply".to_string()))?;
    let ids: Vec<String> = serde_json::from_str(&raw_ids)
        .map_err(|e| CacheError::CacheStore(format!("Corrupt id list: {}", e)))?;

    let mut bodies = HashMap::with_capacity(ids.len());
    for (id, body) in ids.iter().zip(values) {
        if !body.is_empty() {
            bodies.insert(id.clone(), body);
        }
    }

    Ok(QueryResult { ids, bodies })
}

/// KEYS and ARGV for the populate script
fn populate_command(
    collection: &str,
    fingerprint: &str,
    common_index: &str,
    ids: &[String],
    bodies: &[(String, String)],
    ttl: Duration,
) -> CacheResult<(Vec<String>, Vec<String>)> {
    let mut keys = Vec::with_capacity(2 + bodies.len());
    keys.push(query_key(collection, fingerprint));
    let indexed = !common_index.is_empty();
    if indexed {
        keys.push(common_index_key(common_index));
    }

    let mut args = Vec::with_capacity(3 + bodies.len());
    args.push(ttl_millis(ttl).to_string());
    args.push(serde_json::to_string(ids)?);
    args.push(if indexed { "1" } else { "0" }.to_string());

    for (id, body) in bodies {
        keys.push(document_key(collection, id));
        args.push(body.clone());
    }
    Ok((keys, args))
}

fn ttl_millis(ttl: Duration) -> i64 {
    ttl.as_millis().clamp(1, i64::MAX as u128) as i64
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_query_result(&self, collection: &str, fingerprint: &str) -> CacheResult<Option<QueryResult>> {
        let key = query_key(collection, fingerprint);
        debug!("Retrieving query result for {}", key);

        let reply: Option<Vec<String>> = self.client
            .next()
            .eval(GET_QUERY_RESULT_SCRIPT, vec![key], vec![document_key_prefix(collection)])
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to get query result: {}", e)))?;

        reply.map(parse_query_result).transpose()
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
        let (keys, args) = populate_command(collection, fingerprint, common_index, ids, bodies, ttl)?;

        let written: i64 = self.client
            .next()
            .eval(SET_QUERY_RESULT_SCRIPT, keys, args)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to set query result: {}", e)))?;

        debug!("Cached {} ids and {} bodies for {}:{}", ids.len(), written, collection, fingerprint);
        Ok(())
    }

    async fn invalidate(&self, common_index: &str) -> CacheResult<u64> {
        let removed: i64 = self.client
            .next()
            .eval(INVALIDATE_SCRIPT, vec![common_index_key(common_index)], Vec::<String>::new())
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to invalidate {}: {}", common_index, e)))?;

        info!("Invalidated {} query results for common index {}", removed, common_index);
        Ok(removed.max(0) as u64)
    }

    async fn evict_documents(&self, collection: &str, ids: &[String]) -> CacheResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = ids.iter().map(|id| document_key(collection, id)).collect();

        // Use UNLINK for non-blocking deletion
        let deleted: i64 = self.client
            .unlink(keys)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to evict documents: {}", e)))?;

        debug!("Evicted {} document bodies from {}", deleted, collection);
        Ok(deleted.max(0) as u64)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.client
            .get(key)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to get {}: {}", key, e)))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let expiration = if ttl.is_zero() { None } else { Some(Expiration::PX(ttl_millis(ttl))) };

        let _: () = self.client
            .set(key, value, expiration, None, false)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to set {}: {}", key, e)))?;

        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.client
            .next()
            .hget(key, field)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to read hash {}: {}", key, e)))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        let _: i64 = self.client
            .next()
            .hset(key, (field, value))
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to write hash {}: {}", key, e)))?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        let receivers: i64 = self.client
            .next()
            .publish(channel, message)
            .await
            .map_err(|e| CacheError::CacheStore(format!("Failed to publish to {}: {}", channel, e)))?;
        Ok(receivers.max(0) as u64)
    }

    /// Check Redis connection health
    async fn health_check(&self) -> CacheResult<()> {
        let start = std::time::Instant::now();

        // Use timeout to prevent hanging
        let ping_result = timeout(
            Duration::from_secs(5),
            self.client.ping::<String>()
        ).await;

        match ping_result {
            Ok(Ok(_)) => {
                let duration = start.elapsed();
                debug!("Redis health check passed in {:?}", duration);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Redis health check failed: {}", e);
                Err(CacheError::CacheStore(format!("Health check failed: {}", e)))
            }
            Err(_) => {
                error!("Redis health check timed out");
                Err(CacheError::CacheStore("Health check timed out".to_string()))
            }
        }
    }
}
