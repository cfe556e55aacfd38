//! Health engine: one scheduler driving a reconciler per domain.
//!
//! The scheduler ticks every domain immediately at startup and then on a
//! fixed interval. Per domain, reconciliations are strictly serial; across
//! domains they run in parallel. Cancelling the token passed to
//! [`HealthEngine::run`] stops the loop; probes return promptly and
//! in-flight provider calls get a short grace window.

pub mod reconciler;

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::healthcheck::DomainChecker;
use crate::metrics::AppMetrics;
use crate::registry::ProviderRegistry;
use crate::status::{DomainStatus, StatusSource};
use reconciler::DomainReconciler;

/// Scheduler owning one [`DomainReconciler`] per configured domain
pub struct HealthEngine {
    reconcilers: BTreeMap<String, Arc<DomainReconciler>>,
    interval: Duration,
}

impl std::fmt::Debug for HealthEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthEngine")
            .field("domains", &self.reconcilers.keys().collect::<Vec<_>>())
            .field("interval", &self.interval)
            .finish()
    }
}

impl HealthEngine {
    /// Wire up reconcilers from configuration.
    ///
    /// Fails when a domain references a provider name that is not in the
    /// registry.
    pub fn new(
        config: &Config,
        providers: &ProviderRegistry,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Result<Self> {
        let mut reconcilers = BTreeMap::new();

        for domain in &config.domains {
            let provider = providers.get(&domain.provider).ok_or_else(|| {
                Error::config(format!(
                    "domain '{}' references DNS provider '{}' that is not configured",
                    domain.record_name, domain.provider
                ))
            })?;

            let checker = DomainChecker::new(
                domain.record_name.clone(),
                &domain.endpoints,
                domain.health_checks,
                metrics.clone(),
            );

            reconcilers.insert(
                domain.record_name.clone(),
                Arc::new(DomainReconciler::new(
                    Box::new(checker),
                    provider,
                    domain.ttl,
                    domain.on_all_failed,
                )),
            );
        }

        Ok(Self {
            reconcilers,
            interval: config.interval,
        })
    }

    /// Run until the token is cancelled.
    ///
    /// All domains are ticked immediately, then again every interval. A
    /// pass that outruns the interval is followed by the next one right
    /// away.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            interval = %humantime::format_duration(self.interval),
            domains = self.reconcilers.len(),
            "health checker started"
        );

        self.tick_all(&cancel).await;

        let mut ticker = tokio::time::interval(self.interval);
        // The interval's first tick completes immediately and has already
        // been run above
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("health checker stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tick_all(&cancel).await;
                }
            }
        }
    }

    async fn tick_all(&self, cancel: &CancellationToken) {
        join_all(
            self.reconcilers
                .values()
                .map(|reconciler| reconciler.tick(cancel)),
        )
        .await;
    }
}

impl StatusSource for HealthEngine {
    fn all_domains(&self) -> BTreeMap<String, DomainStatus> {
        self.reconcilers
            .iter()
            .map(|(name, reconciler)| (name.clone(), reconciler.status()))
            .collect()
    }

    fn domain(&self, record_name: &str) -> Option<DomainStatus> {
        self.reconcilers
            .get(record_name)
            .map(|reconciler| reconciler.status())
    }
}
