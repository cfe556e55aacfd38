//! Cloudflare DNS provider.
//!
//! Cloudflare models each A value as an independent record with its own
//! ID, so publishing a set means diffing against the current records and
//! issuing per-record deletes and creates. Deletes run before creates.
//!
//! The API wraps every response in a `{success, errors, result}` envelope
//! and reports failures in-band, so responses are decoded regardless of
//! the HTTP status and `success: false` is the error signal.
//!
//! API reference: <https://developers.cloudflare.com/api/>

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use ddup_core::config::CloudflareConfig;
use ddup_core::{AppMetrics, DnsProvider, Error, Result};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Timeout for each API call
const API_TIMEOUT: Duration = Duration::from_secs(20);

/// Cloudflare DNS provider
pub struct CloudflareProvider {
    name: String,
    api_token: String,
    zone_id: String,
    api_base: String,
    client: reqwest::Client,
    metrics: Option<Arc<AppMetrics>>,
}

// The API token never appears in Debug output
impl fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("name", &self.name)
            .field("api_token", &"<redacted>")
            .field("zone_id", &self.zone_id)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a Cloudflare provider from configuration.
    ///
    /// Fails fast when the API token or zone ID is missing.
    pub fn new(
        name: impl Into<String>,
        config: &CloudflareConfig,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Result<Self> {
        let name = name.into();
        if config.api_token.is_empty() {
            return Err(Error::provider_init(&name, "API token is required"));
        }
        if config.zone_id.is_empty() {
            return Err(Error::provider_init(&name, "zone ID is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::provider_init(&name, format!("building HTTP client: {e}")))?;

        Ok(Self {
            name,
            api_token: config.api_token.clone(),
            zone_id: config.zone_id.clone(),
            api_base: CLOUDFLARE_API_BASE.to_string(),
            client,
            metrics,
        })
    }

    /// Override the API base URL (tests, proxies)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn api_error(&self, message: String) -> Error {
        Error::provider(&self.name, message)
    }

    fn record_metric(&self, method: &str, ok: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_api_call(
                "cloudflare",
                method,
                &format!("/zones/{}/dns_records", self.zone_id),
                ok,
                start.elapsed(),
            );
        }
    }

    async fn get_existing_records(&self, domain: &str) -> Result<Vec<CloudflareRecord>> {
        let start = Instant::now();
        let result = self.get_existing_records_inner(domain).await;
        self.record_metric("GET", result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error getting existing records: {e}")))
    }

    async fn get_existing_records_inner(
        &self,
        domain: &str,
    ) -> std::result::Result<Vec<CloudflareRecord>, String> {
        let url = format!(
            "{}/zones/{}/dns_records?name={}&type=A",
            self.api_base, self.zone_id, domain
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        let envelope: CloudflareEnvelope = response
            .json()
            .await
            .map_err(|e| format!("error reading response body: {e}"))?;

        if !envelope.success {
            return Err(format!("API error: {}", format_errors(&envelope.errors)));
        }

        Ok(envelope.result)
    }

    async fn delete_record(&self, record_id: &str, ip: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.delete_record_inner(record_id).await;
        self.record_metric("DELETE", result.is_ok(), start);
        result.map_err(|e| {
            self.api_error(format!("error deleting record {record_id} for IP {ip}: {e}"))
        })
    }

    async fn delete_record_inner(&self, record_id: &str) -> std::result::Result<(), String> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, self.zone_id, record_id
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        check_status(response).await
    }

    async fn create_record(&self, domain: &str, ip: &str, ttl: u32) -> Result<()> {
        let start = Instant::now();
        let result = self.create_record_inner(domain, ip, ttl).await;
        self.record_metric("POST", result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error creating record for IP {ip}: {e}")))
    }

    async fn create_record_inner(
        &self,
        domain: &str,
        ip: &str,
        ttl: u32,
    ) -> std::result::Result<(), String> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, self.zone_id);

        let body = serde_json::json!({
            "type": "A",
            "name": domain,
            "content": ip,
            "ttl": ttl,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        check_status(response).await
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_records(&self, domain: &str, ttl: u32, desired_ips: &[Ipv4Addr]) -> Result<()> {
        let existing_records = self.get_existing_records(domain).await?;

        // IP → record ID, as the provider currently sees it
        let existing: HashMap<String, String> = existing_records
            .into_iter()
            .map(|record| (record.content, record.id))
            .collect();

        let desired: HashSet<String> = desired_ips.iter().map(Ipv4Addr::to_string).collect();

        // Deletes before creates: frees record quota and avoids transient
        // duplicate IPs
        for (ip, record_id) in &existing {
            if desired.contains(ip) {
                continue;
            }

            debug!(ip, record_id, "deleting record for unpublished IP");
            self.delete_record(record_id, ip).await?;
        }

        for ip in desired_ips {
            let ip = ip.to_string();
            if existing.contains_key(&ip) {
                continue;
            }

            debug!(ip, "creating record for published IP");
            self.create_record(domain, &ip, ttl).await?;
        }

        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> std::result::Result<(), String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!(
            "invalid response status code HTTP {}; response: {body}",
            status.as_u16()
        ));
    }
    Ok(())
}

fn format_errors(errors: &[CloudflareError]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(CloudflareError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A DNS record as returned by the Cloudflare API.
///
/// Only the fields the diff needs are kept; the rest of the payload is
/// ignored.
#[derive(Debug, Clone, Deserialize)]
struct CloudflareRecord {
    id: String,
    content: String,
}

/// Response envelope used by every Cloudflare API endpoint
#[derive(Debug, Deserialize)]
struct CloudflareEnvelope {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    #[serde(default)]
    result: Vec<CloudflareRecord>,
}

/// An error entry in the Cloudflare response envelope
#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: i64,
    message: String,
}

impl fmt::Display for CloudflareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}
