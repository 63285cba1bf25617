use thiserror::Error;

/// Main error type for the document cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// No document matched a single-document lookup
    #[error("Document not found")]
    NotFound,

    /// A generic document could not be projected onto the typed output
    #[error("Decode error: {0}")]
    Decode(String),

    /// Key-value cache store connection or operation error
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// Document database connection or query error
    #[error("Document store error: {0}")]
    DocumentStore(String),

    /// Deadline exceeded while talking to a backing store
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed or unsupported query filter
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Document without a usable identifier
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Outbound HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Check if error came from the cache store
    pub fn is_cache_store_error(&self) -> bool {
        matches!(self, CacheError::CacheStore(_))
    }

    /// Check if error came from the document store
    pub fn is_document_store_error(&self) -> bool {
        matches!(self, CacheError::DocumentStore(_))
    }

    /// Check if error is a missing document
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    /// Get error type as string for logging
    pub fn error_type(&self) -> &'static str {
        match self {
            CacheError::NotFound => "not_found",
            CacheError::Decode(_) => "decode_error",
            CacheError::CacheStore(_) => "cache_store_error",
            CacheError::DocumentStore(_) => "document_store_error",
            CacheError::Timeout(_) => "timeout",
            CacheError::InvalidFilter(_) => "invalid_filter",
            CacheError::InvalidDocument(_) => "invalid_document",
            CacheError::Http(_) => "http_error",
            CacheError::Config(_) => "config_error",
            CacheError::Serialization(_) => "serialization_error",
            CacheError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CacheError::NotFound.is_not_found());
        assert!(CacheError::CacheStore("down".to_string()).is_cache_store_error());
        assert!(CacheError::DocumentStore("down".to_string()).is_document_store_error());
        assert!(!CacheError::Timeout("find".to_string()).is_cache_store_error());
    }

    #[test]
    fn test_error_type_names() {
        assert_eq!(CacheError::NotFound.error_type(), "not_found");
        assert_eq!(CacheError::Decode("x".to_string()).error_type(), "decode_error");
        assert_eq!(CacheError::Timeout("x".to_string()).error_type(), "timeout");
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: CacheError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.error_type(), "serialization_error");
    }
}
