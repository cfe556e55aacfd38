//! Health checking: per-endpoint probes and per-domain fan-out.

mod probe;

pub use probe::{EndpointProber, ProbeOutcome};

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{EndpointConfig, HealthCheckConfig};
use crate::metrics::AppMetrics;

/// Health checking capability for one domain.
///
/// The reconciler only sees this trait, so tests can drive it with
/// scripted outcomes.
#[async_trait]
pub trait Checker: Send + Sync {
    /// The DNS record name this checker serves
    fn domain(&self) -> &str;

    /// Consecutive failures required before an endpoint is unpublished
    fn max_attempts(&self) -> u32;

    /// Probe every endpoint concurrently.
    ///
    /// Results come back in the endpoints' declared order. All probes
    /// share the caller's cancellation; cancelled probes report Unhealthy
    /// with the cancellation reason.
    async fn check_all(&self, cancel: &CancellationToken) -> Vec<ProbeOutcome>;
}

/// Concrete [`Checker`] probing the configured endpoints over HTTP
pub struct DomainChecker {
    domain: String,
    attempts: u32,
    probers: Vec<EndpointProber>,
    metrics: Option<Arc<AppMetrics>>,
}

impl DomainChecker {
    /// Build a checker for one domain; probers and their HTTP clients are
    /// created here, once.
    pub fn new(
        domain: impl Into<String>,
        endpoints: &[EndpointConfig],
        policy: HealthCheckConfig,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Self {
        let probers = endpoints
            .iter()
            .map(|endpoint| EndpointProber::new(endpoint, policy.timeout))
            .collect();

        Self {
            domain: domain.into(),
            attempts: policy.attempts,
            probers,
            metrics,
        }
    }
}

#[async_trait]
impl Checker for DomainChecker {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    async fn check_all(&self, cancel: &CancellationToken) -> Vec<ProbeOutcome> {
        let results = join_all(self.probers.iter().map(|prober| prober.probe(cancel))).await;

        if let Some(metrics) = &self.metrics {
            for result in &results {
                metrics.record_health_check(&self.domain, &result.endpoint, result.healthy);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn check_all_preserves_declared_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let endpoints = vec![
            EndpointConfig {
                name: "b".to_string(),
                url: format!("{}/broken", server.uri()),
                ip: Ipv4Addr::new(10, 0, 0, 2),
                host: None,
            },
            EndpointConfig {
                name: "a".to_string(),
                url: format!("{}/ok", server.uri()),
                ip: Ipv4Addr::new(10, 0, 0, 1),
                host: None,
            },
        ];

        let checker = DomainChecker::new(
            "app.example.com",
            &endpoints,
            HealthCheckConfig {
                timeout: Duration::from_secs(1),
                attempts: 2,
            },
            None,
        );

        let results = checker.check_all(&CancellationToken::new()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].endpoint, "b");
        assert!(!results[0].healthy);
        assert_eq!(results[1].endpoint, "a");
        assert!(results[1].healthy);
    }
}
