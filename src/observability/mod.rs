pub mod health;
pub mod metrics;
pub mod tracing;

pub use health::{ComponentHealth, HealthChecker, HealthReport, HealthStatus};
pub use metrics::{Metrics, MetricsRegistry, Timer};
pub use tracing::init_tracing;

/// Sanitize URL for logging by masking credentials
pub fn sanitize_url_for_logging(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut sanitized = parsed.clone();
        if parsed.password().is_some() {
            let _ = sanitized.set_password(Some("***"));
        }
        if !parsed.username().is_empty() {
            let _ = sanitized.set_username("***");
        }
        sanitized.to_string()
    } else {
        // If URL parsing fails, just mask the entire thing after the protocol
        if let Some(pos) = url.find("://") {
            format!("{}://***", &url[..pos])
        } else {
            "***".to_string()
        }
    }
}
