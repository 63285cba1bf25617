/// Document database module
///
/// This module defines the document-store contract the query executor reads
/// through, with a Postgres JSONB implementation and an in-process one.

mod memory;
mod postgres_client;
mod sql;

#[cfg(test)]
mod tests;

use crate::error::CacheResult;
use crate::filter::Filter;
use crate::types::{CountOptions, Document, FindOneOptions, FindOptions};
use async_trait::async_trait;

pub use memory::MemoryDocumentStore;
pub use postgres_client::PostgresDocumentStore;
pub use sql::validate_collection_name;

/// Read side of the document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document matching `filter`, honouring sort, skip and limit
    async fn find_many(&self, collection: &str, filter: &Filter, options: Option<&FindOptions>) -> CacheResult<Vec<Document>>;

    /// First matching document; `CacheError::NotFound` when none matches
    async fn find_one(&self, collection: &str, filter: &Filter, options: Option<&FindOneOptions>) -> CacheResult<Document>;

    /// Number of matching documents within the skip/limit window
    async fn count(&self, collection: &str, filter: &Filter, options: Option<&CountOptions>) -> CacheResult<i64>;

    async fn health_check(&self) -> CacheResult<()>;
}
