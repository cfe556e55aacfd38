//! Status view over the engine's runtime state.
//!
//! The HTTP surface consumes [`StatusSource`] only; reconcilers are the
//! sole writers of the underlying state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Snapshot of one domain's most recent reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    /// When the last reconciliation attempt finished; absent before the
    /// first tick completes
    pub last_updated: Option<DateTime<Utc>>,

    /// Name of the provider instance publishing this domain
    pub provider: String,

    /// Error from the last reconciliation, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Per-IP view; ordering is unspecified
    pub endpoints: Vec<EndpointStatus>,
}

/// Snapshot of one endpoint IP.
///
/// An IP can be both published and failing: during a grace period it keeps
/// serving while its consecutive-failure count climbs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// The endpoint's IPv4 address
    pub ip: Ipv4Addr,

    /// Whether the IP is currently in the published set
    pub healthy: bool,

    /// Consecutive failed probes, omitted when zero
    #[serde(default, skip_serializing_if = "failure_count_is_zero")]
    pub failure_count: u32,
}

fn failure_count_is_zero(count: &u32) -> bool {
    *count == 0
}

/// Read-only access to every domain's last outcome
pub trait StatusSource: Send + Sync {
    /// Snapshot of all domains, keyed by record name
    fn all_domains(&self) -> BTreeMap<String, DomainStatus>;

    /// Snapshot of one domain, if it is managed
    fn domain(&self, record_name: &str) -> Option<DomainStatus>;
}
