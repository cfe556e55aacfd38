//! Metrics instrumentation for ddup.
//!
//! All metrics are prefixed with `ddup.` and recorded through the
//! [`metrics`] facade; the daemon decides whether an exporter is
//! installed. Components take an `Option<Arc<AppMetrics>>` and record
//! nothing when it is `None`.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics sink for health checks and provider API calls
#[derive(Debug, Default)]
pub struct AppMetrics {
    _priv: (),
}

impl AppMetrics {
    /// Create a new metrics sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one endpoint probe
    pub fn record_health_check(&self, domain: &str, endpoint: &str, ok: bool) {
        counter!(
            "ddup.checks",
            "domain" => domain.to_string(),
            "endpoint" => endpoint.to_string(),
            "ok" => ok.to_string()
        )
        .increment(1);
    }

    /// Record one provider API call and its duration in milliseconds
    pub fn record_api_call(
        &self,
        provider: &str,
        method: &str,
        path: &str,
        ok: bool,
        duration: Duration,
    ) {
        histogram!(
            "ddup.api_calls.duration.ms",
            "provider" => provider.to_string(),
            "method" => method.to_string(),
            "path" => path.to_string(),
            "ok" => ok.to_string()
        )
        .record(duration.as_secs_f64() * 1000.0);
    }
}
