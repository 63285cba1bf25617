use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{CacheError, CacheResult};

/// Loosely typed document as stored in the document database
pub type Document = Map<String, Value>;

/// Primary-key field carried by every document
pub const ID_FIELD: &str = "_id";

/// Derive the stable string key of a document from its `_id` field.
pub fn document_id(doc: &Document) -> CacheResult<String> {
    match doc.get(ID_FIELD) {
        Some(value) => id_key(value).ok_or_else(|| {
            CacheError::InvalidDocument(format!("unsupported {} value: {}", ID_FIELD, value))
        }),
        None => Err(CacheError::InvalidDocument(format!("document has no {} field", ID_FIELD))),
    }
}

/// String key of an identifier value.
///
/// Strings are used verbatim, integers in decimal, and extended-JSON object
/// ids (`{"$oid": "..."}`) by their hex payload.
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        Value::Object(map) if map.len() == 1 => match map.get("$oid") {
            Some(Value::String(oid)) => Some(oid.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Sort direction for a single sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordered sort keys; earlier keys take precedence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sort(pub Vec<(String, SortOrder)>);

impl Sort {
    pub fn asc(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), SortOrder::Ascending));
        self
    }

    pub fn desc(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), SortOrder::Descending));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options for multi-document finds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(skip_serializing_if = "Sort::is_empty", default)]
    pub sort: Sort,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<u64>,
}

/// Options for single-document finds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOneOptions {
    #[serde(skip_serializing_if = "Sort::is_empty", default)]
    pub sort: Sort,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skip: Option<u64>,
}

/// Options for counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountOptions {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<u64>,
}

impl From<FindOneOptions> for FindOptions {
    fn from(options: FindOneOptions) -> Self {
        FindOptions {
            sort: options.sort,
            skip: options.skip,
            limit: Some(1),
        }
    }
}

/// Extra request header for outbound GETs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response returned by the HTTP response cache
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status code (the original status for cached errors)
    pub status: u16,
    /// Response headers; empty when served from cache
    pub headers: HashMap<String, String>,
    /// Raw response body; empty for cached errors
    pub body: Vec<u8>,
    /// Whether the response was served from cache
    pub from_cache: bool,
}

impl CachedResponse {
    /// Status in the cacheable success range [200, 400)
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
