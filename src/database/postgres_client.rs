use super::sql::{self, Statement};
use super::DocumentStore;
use crate::config::DatabaseConfig;
use crate::error::{CacheError, CacheResult};
use crate::filter::Filter;
use crate::types::{document_id, CountOptions, Document, FindOneOptions, FindOptions, Sort};
use async_trait::async_trait;
use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

/// Postgres-backed document store: one JSONB table per collection
pub struct PostgresDocumentStore {
    /// Connection pool for Postgres
    pool: Pool,
    /// Configuration
    config: DatabaseConfig,
}

impl PostgresDocumentStore {
    /// Create a new document store with connection pooling
    pub async fn new(config: DatabaseConfig) -> CacheResult<Self> {
        info!("Initializing Postgres document store with URL: {}", crate::observability::sanitize_url_for_logging(&config.url));

        let url = &config.url;
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            return Err(CacheError::DocumentStore("Invalid database URL format".to_string()));
        }

        let mut pg_config = Config::new();
        pg_config.url = Some(url.clone());
        let mut pool_config = PoolConfig::new(config.max_connections as usize);
        pool_config.timeouts.wait = Some(Duration::from_secs(config.connection_timeout_secs));
        pool_config.timeouts.create = Some(Duration::from_secs(config.connection_timeout_secs));
        pg_config.pool = Some(pool_config);

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CacheError::DocumentStore(format!("Failed to create connection pool: {}", e)))?;

        let store = PostgresDocumentStore { pool, config };

        // Test basic connectivity
        let client = store.connection().await?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to test connection: {}", e)))?;

        info!("Postgres document store connected successfully");
        Ok(store)
    }

    async fn connection(&self) -> CacheResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to get connection: {}", e)))
    }

    fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.config.statement_timeout_ms)
    }

    /// Run a read statement; a collection that was never created reads as empty
    async fn query(&self, statement: &Statement) -> CacheResult<Vec<Row>> {
        let client = self.connection().await?;
        let params = statement.param_refs();

        let result = timeout(self.statement_timeout(), client.query(statement.sql.as_str(), &params))
            .await
            .map_err(|_| CacheError::Timeout(format!("Query exceeded {}ms", self.config.statement_timeout_ms)))?;

        match result {
            Ok(rows) => Ok(rows),
            Err(e) if e.code() == Some(&SqlState::UNDEFINED_TABLE) => {
                debug!("Collection table missing, treating as empty: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(CacheError::DocumentStore(format!("Query failed: {}", e))),
        }
    }

    async fn select(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> CacheResult<Vec<Document>> {
        let statement = sql::select(collection, filter, sort, skip, limit)?;
        let rows = self.query(&statement).await?;
        rows.iter().map(row_to_document).collect()
    }

    /// Create the table backing a collection if it does not exist
    pub async fn ensure_collection(&self, collection: &str) -> CacheResult<()> {
        let table = sql::table(collection)?;
        let client = self.connection().await?;

        let create_table_query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                doc JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            table
        );
        client
            .execute(create_table_query.as_str(), &[])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to create collection {}: {}", collection, e)))?;

        let create_index_query = format!(
            "CREATE INDEX IF NOT EXISTS \"{}_doc_gin\" ON {} USING GIN (doc jsonb_path_ops)",
            collection, table
        );
        client
            .execute(create_index_query.as_str(), &[])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to create index on {}: {}", collection, e)))?;

        info!("Collection {} ready", collection);
        Ok(())
    }

    /// Insert a new document; fails if its id is already taken
    pub async fn insert(&self, collection: &str, doc: &Document) -> CacheResult<String> {
        let table = sql::table(collection)?;
        let id = document_id(doc)?;
        let client = self.connection().await?;
        let body = Value::Object(doc.clone());

        client
            .execute(format!("INSERT INTO {} (id, doc) VALUES ($1, $2)", table).as_str(), &[&id, &body])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to insert {} into {}: {}", id, collection, e)))?;

        debug!("Inserted document {} into {}", id, collection);
        Ok(id)
    }

    /// Insert or replace a document by id
    pub async fn upsert(&self, collection: &str, doc: &Document) -> CacheResult<String> {
        let table = sql::table(collection)?;
        let id = document_id(doc)?;
        let client = self.connection().await?;
        let body = Value::Object(doc.clone());

        let query = format!(
            "INSERT INTO {} (id, doc) VALUES ($1, $2)
             ON CONFLICT (id)
             DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
            table
        );
        client
            .execute(query.as_str(), &[&id, &body])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to upsert {} into {}: {}", id, collection, e)))?;

        debug!("Upserted document {} into {}", id, collection);
        Ok(id)
    }

    /// Delete a document by id; returns whether a row was removed
    pub async fn delete(&self, collection: &str, id: &str) -> CacheResult<bool> {
        let table = sql::table(collection)?;
        let client = self.connection().await?;

        let rows_affected = client
            .execute(format!("DELETE FROM {} WHERE id = $1", table).as_str(), &[&id])
            .await
            .map_err(|e| CacheError::DocumentStore(format!("Failed to delete {} from {}: {}", id, collection, e)))?;

        if rows_affected == 0 {
            warn!("Attempted to delete non-existent document {} from {}", id, collection);
        }
        Ok(rows_affected > 0)
    }
}

fn row_to_document(row: &Row) -> CacheResult<Document> {
    let value: Value = row
        .try_get(0)
        .map_err(|e| CacheError::DocumentStore(format!("Failed to read document column: {}", e)))?;

    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(CacheError::InvalidDocument(format!("stored document is not an object: {}", other))),
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find_many(&self, collection: &str, filter: &Filter, options: Option<&FindOptions>) -> CacheResult<Vec<Document>> {
        let options = options.cloned().unwrap_or_default();
        let docs = self.select(collection, filter, &options.sort, options.skip, options.limit).await?;
        debug!("find_many on {} returned {} documents", collection, docs.len());
        Ok(docs)
    }

    async fn find_one(&self, collection: &str, filter: &Filter, options: Option<&FindOneOptions>) -> CacheResult<Document> {
        let options: FindOptions = options.cloned().unwrap_or_default().into();
        self.select(collection, filter, &options.sort, options.skip, options.limit)
            .await?
            .into_iter()
            .next()
            .ok_or(CacheError::NotFound)
    }

    async fn count(&self, collection: &str, filter: &Filter, options: Option<&CountOptions>) -> CacheResult<i64> {
        let options = options.cloned().unwrap_or_default();
        let statement = sql::count(collection, filter, options.skip, options.limit)?;
        let rows = self.query(&statement).await?;

        match rows.first() {
            Some(row) => row
                .try_get::<_, i64>(0)
                .map_err(|e| CacheError::DocumentStore(format!("Failed to read count: {}", e))),
            None => Ok(0),
        }
    }

    /// Check database connection health
    async fn health_check(&self) -> CacheResult<()> {
        let start = std::time::Instant::now();

        let client = self.connection().await?;
        let rows = timeout(Duration::from_secs(5), client.query("SELECT 1, version()", &[]))
            .await
            .map_err(|_| CacheError::DocumentStore("Health check timed out".to_string()))?
            .map_err(|e| CacheError::DocumentStore(format!("Health check query failed: {}", e)))?;

        if rows.is_empty() {
            return Err(CacheError::DocumentStore("Health check returned no results".to_string()));
        }

        debug!("Database health check passed in {:?}", start.elapsed());
        Ok(())
    }
}
