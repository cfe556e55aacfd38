//! Per-domain reconciliation: probe, debounce, publish.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AllFailedAction;
use crate::error::{Error, Result};
use crate::healthcheck::Checker;
use crate::status::{DomainStatus, EndpointStatus};
use crate::traits::DnsProvider;

/// How long an in-flight provider call may keep running once shutdown has
/// been requested
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime state of one domain.
///
/// `published_ips` is the set of IPs believed to be in DNS; it is seeded
/// empty at startup and grows by observation. An IP has an entry in
/// `failure_counts` iff its most recent probe failed; the count saturates
/// instead of wrapping so long-failing endpoints stay observable.
#[derive(Debug, Default)]
struct DomainState {
    published_ips: Vec<Ipv4Addr>,
    failure_counts: HashMap<Ipv4Addr, u32>,
    last_updated: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Drives one domain: fans out health checks, debounces endpoint flaps
/// with a consecutive-failure counter, and publishes the resulting IP set
/// through the domain's DNS provider when it changes.
pub struct DomainReconciler {
    checker: Box<dyn Checker>,
    provider: Arc<dyn DnsProvider>,
    ttl: u32,
    on_all_failed: AllFailedAction,
    state: Mutex<DomainState>,
    // Held for the whole reconciliation: ticks for one domain never overlap
    tick_lock: tokio::sync::Mutex<()>,
}

impl DomainReconciler {
    /// Create a reconciler for one domain
    pub fn new(
        checker: Box<dyn Checker>,
        provider: Arc<dyn DnsProvider>,
        ttl: u32,
        on_all_failed: AllFailedAction,
    ) -> Self {
        Self {
            checker,
            provider,
            ttl,
            on_all_failed,
            state: Mutex::new(DomainState::default()),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The DNS record name this reconciler manages
    pub fn domain(&self) -> &str {
        self.checker.domain()
    }

    /// Run one reconciliation: probe all endpoints, update the debounce
    /// state, and publish if the desired set differs from the published
    /// one. Provider failures leave the published set untouched so the
    /// next tick retries.
    pub async fn tick(&self, cancel: &CancellationToken) {
        let _serial = self.tick_lock.lock().await;

        let domain = self.checker.domain();
        let max_attempts = self.checker.max_attempts();

        let (published, mut failure_counts) = {
            let state = self.state.lock();
            (state.published_ips.clone(), state.failure_counts.clone())
        };

        let results = self.checker.check_all(cancel).await;

        let mut new_published = Vec::with_capacity(results.len());
        for result in &results {
            let ip = result.ip;

            if result.healthy {
                debug!(domain, endpoint = %result.endpoint, %ip, "endpoint is healthy");
                new_published.push(ip);
                failure_counts.remove(&ip);
                continue;
            }

            warn!(
                domain,
                endpoint = %result.endpoint,
                %ip,
                error = result.error.as_deref().unwrap_or("unknown"),
                "endpoint health check failed"
            );

            let count = failure_counts.entry(ip).or_insert(0);
            *count = count.saturating_add(1);

            // Grace: under the failure allowance, an endpoint that was
            // published stays published
            if *count < max_attempts && published.contains(&ip) {
                new_published.push(ip);
            }
        }

        if elements_match(&published, &new_published) {
            debug!(domain, "healthy IPs unchanged, skipping DNS update");
            self.commit(new_published, failure_counts);
            return;
        }

        if new_published.is_empty() && self.on_all_failed == AllFailedAction::Preserve {
            // Refusing to black-hole the record: the last known IPs stay
            // published at the provider
            warn!(domain, "no healthy endpoints found, not updating DNS");
            self.commit(new_published, failure_counts);
            return;
        }

        match self.update_provider(cancel, &new_published).await {
            Ok(()) => {
                info!(domain, ips = ?new_published, "updated DNS records");
                self.commit(new_published, failure_counts);
            }
            Err(e) => {
                error!(domain, error = %e, "error updating DNS records");
                self.set_error(format!("error updating DNS records: {e}"));
            }
        }
    }

    /// Current status snapshot for this domain.
    ///
    /// Every published IP is reported healthy, with its in-flight failure
    /// count when it is in a grace period. Every counted IP outside the
    /// published set is reported unhealthy.
    pub fn status(&self) -> DomainStatus {
        let state = self.state.lock();

        let mut endpoints =
            Vec::with_capacity(state.published_ips.len() + state.failure_counts.len());
        for ip in &state.published_ips {
            endpoints.push(EndpointStatus {
                ip: *ip,
                healthy: true,
                failure_count: state.failure_counts.get(ip).copied().unwrap_or(0),
            });
        }
        for (ip, count) in &state.failure_counts {
            if !state.published_ips.contains(ip) {
                endpoints.push(EndpointStatus {
                    ip: *ip,
                    healthy: false,
                    failure_count: *count,
                });
            }
        }

        DomainStatus {
            last_updated: state.last_updated,
            provider: self.provider.name().to_string(),
            error: state.last_error.clone(),
            endpoints,
        }
    }

    async fn update_provider(
        &self,
        cancel: &CancellationToken,
        ips: &[Ipv4Addr],
    ) -> Result<()> {
        let update = self
            .provider
            .update_records(self.checker.domain(), self.ttl, ips);

        // On shutdown the call gets a grace window to finish before being
        // aborted
        tokio::select! {
            result = update => result,
            () = async {
                cancel.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => Err(Error::cancelled("provider call aborted by shutdown")),
        }
    }

    fn commit(&self, published: Vec<Ipv4Addr>, failure_counts: HashMap<Ipv4Addr, u32>) {
        let mut state = self.state.lock();
        state.published_ips = published;
        state.failure_counts = failure_counts;
        state.last_updated = Some(Utc::now());
        state.last_error = None;
    }

    fn set_error(&self, error: String) {
        let mut state = self.state.lock();
        state.last_updated = Some(Utc::now());
        state.last_error = Some(error);
    }
}

/// Order-insensitive comparison of two IP lists
fn elements_match(a: &[Ipv4Addr], b: &[Ipv4Addr]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn elements_match_ignores_order() {
        assert!(elements_match(&[], &[]));
        assert!(elements_match(&[ip(1), ip(2)], &[ip(2), ip(1)]));
        assert!(!elements_match(&[ip(1)], &[ip(2)]));
        assert!(!elements_match(&[ip(1), ip(1)], &[ip(1), ip(2)]));
        assert!(!elements_match(&[ip(1)], &[ip(1), ip(1)]));
    }
}
