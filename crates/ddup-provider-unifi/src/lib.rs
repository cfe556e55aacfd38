//! Unifi static-DNS provider.
//!
//! Publishes records through a Unifi controller's static DNS API.
//! Record-oriented like Cloudflare: every A value is its own entry with
//! an ID. The list endpoint returns all static DNS entries for the site,
//! so results are filtered to enabled A records for the managed domain.
//!
//! UnifiOS consoles proxy the network application under
//! `/proxy/network`; standalone (external) controllers serve the same API
//! at the root. The controller keeps a session cookie after the first
//! request, so the client carries a cookie jar.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use ddup_core::config::UnifiConfig;
use ddup_core::{AppMetrics, DnsProvider, Error, Result};

/// Timeout for each API call
const API_TIMEOUT: Duration = Duration::from_secs(20);

/// Unifi static-DNS provider
pub struct UnifiProvider {
    name: String,
    host: String,
    api_key: String,
    site: String,
    external_controller: bool,
    client: reqwest::Client,
    metrics: Option<Arc<AppMetrics>>,
}

// The API key never appears in Debug output
impl fmt::Debug for UnifiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiProvider")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("site", &self.site)
            .field("external_controller", &self.external_controller)
            .finish()
    }
}

impl UnifiProvider {
    /// Create a Unifi provider from configuration.
    ///
    /// Fails fast when the controller host or API key is missing.
    pub fn new(
        name: impl Into<String>,
        config: &UnifiConfig,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Result<Self> {
        let name = name.into();
        if config.host.is_empty() {
            return Err(Error::provider_init(&name, "host is required"));
        }
        if config.api_key.is_empty() {
            return Err(Error::provider_init(&name, "API key is required"));
        }

        let site = if config.site.is_empty() {
            "default".to_string()
        } else {
            config.site.clone()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .cookie_store(true);
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| Error::provider_init(&name, format!("building HTTP client: {e}")))?;

        Ok(Self {
            name,
            host: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            site,
            external_controller: config.external_controller,
            client,
            metrics,
        })
    }

    fn api_error(&self, message: String) -> Error {
        Error::provider(&self.name, message)
    }

    fn api_path(&self, record_id: Option<&str>) -> String {
        let base = if self.external_controller {
            format!("/v2/api/site/{}/static-dns", self.site)
        } else {
            format!("/proxy/network/v2/api/site/{}/static-dns", self.site)
        };

        match record_id {
            Some(id) => format!("{base}/{id}"),
            None => base,
        }
    }

    fn record_metric(&self, method: &str, path: &str, ok: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_api_call("unifi", method, path, ok, start.elapsed());
        }
    }

    async fn do_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&UnifiDnsRecord>,
    ) -> std::result::Result<reqwest::Response, String> {
        let url = format!("{}{path}", self.host);

        let mut request = self
            .client
            .request(method, url)
            .header("X-Api-Key", &self.api_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| format!("request error: {e}"))
    }

    async fn get_existing_records(&self, domain: &str) -> Result<Vec<UnifiDnsRecord>> {
        let start = Instant::now();
        let path = self.api_path(None);
        let result = self.get_existing_records_inner(domain, &path).await;
        self.record_metric("GET", &path, result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error getting existing records: {e}")))
    }

    async fn get_existing_records_inner(
        &self,
        domain: &str,
        path: &str,
    ) -> std::result::Result<Vec<UnifiDnsRecord>, String> {
        let response = self.do_request(reqwest::Method::GET, path, None).await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "invalid response status code HTTP {}; response: {body}",
                status.as_u16()
            ));
        }

        let records: Vec<UnifiDnsRecord> = response
            .json()
            .await
            .map_err(|e| format!("error decoding response: {e}"))?;

        Ok(records
            .into_iter()
            .filter(|r| r.key == domain && r.record_type == "A" && r.enabled)
            .collect())
    }

    async fn delete_record(&self, record_id: &str, ip: &str) -> Result<()> {
        let start = Instant::now();
        let path = self.api_path(Some(record_id));
        let result = self.delete_record_inner(&path).await;
        self.record_metric("DELETE", &path, result.is_ok(), start);
        result.map_err(|e| {
            self.api_error(format!("error deleting record {record_id} for IP {ip}: {e}"))
        })
    }

    async fn delete_record_inner(&self, path: &str) -> std::result::Result<(), String> {
        let response = self.do_request(reqwest::Method::DELETE, path, None).await?;

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

    async fn create_record(&self, domain: &str, ip: &str, ttl: u32) -> Result<()> {
        let start = Instant::now();
        let path = self.api_path(None);
        let result = self.create_record_inner(domain, ip, ttl, &path).await;
        self.record_metric("POST", &path, result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error creating record for IP {ip}: {e}")))
    }

    async fn create_record_inner(
        &self,
        domain: &str,
        ip: &str,
        ttl: u32,
        path: &str,
    ) -> std::result::Result<(), String> {
        let record = UnifiDnsRecord {
            id: None,
            key: domain.to_string(),
            record_type: "A".to_string(),
            value: ip.to_string(),
            ttl,
            enabled: true,
        };

        let response = self
            .do_request(reqwest::Method::POST, path, Some(&record))
            .await?;

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
}

#[async_trait]
impl DnsProvider for UnifiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_records(&self, domain: &str, ttl: u32, desired_ips: &[Ipv4Addr]) -> Result<()> {
        let existing_records = self.get_existing_records(domain).await?;

        let existing: HashMap<String, String> = existing_records
            .into_iter()
            .filter_map(|record| record.id.map(|id| (record.value, id)))
            .collect();

        let desired: HashSet<String> = desired_ips.iter().map(Ipv4Addr::to_string).collect();

        // Deletes before creates
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

/// A static DNS record in the Unifi network API
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnifiDnsRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    key: String,
    record_type: String,
    value: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    enabled: bool,
}
