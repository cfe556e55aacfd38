//! # ddup-core
//!
//! Core library for ddup, a health-checked dynamic DNS updater.
//!
//! For each configured domain, an ordered set of candidate endpoints is
//! probed over HTTP on a fixed interval. The union of IPs whose endpoints
//! are currently healthy is published to the domain's DNS provider as an
//! A-record set, so external resolvers see a round-robin set that excludes
//! failed replicas.
//!
//! The main pieces:
//! - [`DnsProvider`]: trait for publishing an exact IP set via provider APIs
//! - [`healthcheck`]: per-endpoint HTTP probing and per-domain fan-out
//! - [`HealthEngine`]: scheduler driving one reconciler per domain
//! - [`StatusSource`]: read-only status view consumed by the HTTP surface
//! - [`ProviderRegistry`]: named provider instances resolved at startup

pub mod config;
pub mod engine;
pub mod error;
pub mod healthcheck;
pub mod metrics;
pub mod registry;
pub mod status;
pub mod traits;

pub use config::{Config, DomainConfig, EndpointConfig, ProviderConfig};
pub use engine::{HealthEngine, reconciler::DomainReconciler};
pub use error::{Error, Result};
pub use metrics::AppMetrics;
pub use registry::ProviderRegistry;
pub use status::{DomainStatus, StatusSource};
pub use traits::DnsProvider;

/// User agent sent by health check probes
pub const USER_AGENT: &str = concat!("ddup/", env!("CARGO_PKG_VERSION"));
