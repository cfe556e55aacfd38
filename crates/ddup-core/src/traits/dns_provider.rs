//! DNS provider trait.
//!
//! Defines the narrow capability the reconciler needs from a provider:
//! make the A-record set for a domain equal to a desired IP set.

use async_trait::async_trait;
use std::net::Ipv4Addr;

use crate::error::Result;

/// Trait for DNS provider implementations.
///
/// After a successful [`update_records`](DnsProvider::update_records)
/// call, the provider's A-record set for `domain` equals exactly
/// `desired_ips` with the given `ttl`. Implementations must compute the
/// diff against the provider's current view and issue only the necessary
/// mutations; given an unchanged provider state and the same arguments, a
/// second call performs zero writes.
///
/// An empty `desired_ips` means delete the record; when no record exists
/// either, this is a no-op success.
///
/// Implementations do not retry: any failure is bubbled up verbatim and
/// the reconciler retries on its next tick. Implementations must be
/// thread-safe and usable across async tasks.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// The configured instance name, for logs and the status API
    fn name(&self) -> &str;

    /// Reconcile the provider's A-records for `domain` to `desired_ips`
    async fn update_records(&self, domain: &str, ttl: u32, desired_ips: &[Ipv4Addr]) -> Result<()>;
}
