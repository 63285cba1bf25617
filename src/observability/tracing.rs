use tracing::subscriber::set_global_default;
use tracing_subscriber::{
    fmt::{self, format::JsonFields},
    layer::SubscriberExt,
    EnvFilter, Registry,
};
use crate::error::{CacheError, CacheResult};

/// Default directives when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,docstore_cache=debug";

/// Initialize global tracing subscriber with JSON formatting
pub fn init_tracing() -> CacheResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let formatting_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(true)
        .fmt_fields(JsonFields::new());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(formatting_layer);

    set_global_default(subscriber)
        .map_err(|e| CacheError::Internal(format!("Failed to set global subscriber: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn test_tracing_initialization() {
        // A second global subscriber is rejected, so only the first call in
        // the test binary can succeed
        match init_tracing() {
            Ok(_) => {
                info!("Tracing initialized successfully");
                warn!("Test warning message");
                assert!(init_tracing().is_err());
            }
            Err(e) => {
                println!("Tracing already initialized: {}", e);
            }
        }
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
