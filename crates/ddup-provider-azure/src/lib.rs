//! Azure DNS provider.
//!
//! Record-set oriented: a name owns one record-set holding every A value,
//! so publishing is a single PUT (or DELETE when the desired set is
//! empty) instead of per-record mutations. The record-set is only written
//! when the desired and current IP multisets differ; comparison is
//! order-insensitive, so reordering endpoints never causes a write.
//!
//! Authentication uses a service principal via the OAuth2
//! client-credentials grant; tokens are cached until shortly before
//! expiry.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use ddup_core::config::AzureConfig;
use ddup_core::{AppMetrics, DnsProvider, Error, Result};

/// Azure Resource Manager base URL
const MANAGEMENT_BASE: &str = "https://management.azure.com";

/// Entra ID token endpoint base URL
const LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// DNS API version
const API_VERSION: &str = "2018-05-01";

/// OAuth2 scope for Azure Resource Manager
const TOKEN_SCOPE: &str = "https://management.azure.com/.default";

/// Timeout for each API call
const API_TIMEOUT: Duration = Duration::from_secs(20);

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Azure DNS provider
pub struct AzureProvider {
    name: String,
    subscription_id: String,
    resource_group_name: String,
    zone_name: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    management_base: String,
    login_base: String,
    client: reqwest::Client,
    metrics: Option<Arc<AppMetrics>>,
    token_cache: Mutex<Option<CachedToken>>,
}

// The client secret never appears in Debug output
impl fmt::Debug for AzureProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureProvider")
            .field("name", &self.name)
            .field("subscription_id", &self.subscription_id)
            .field("resource_group_name", &self.resource_group_name)
            .field("zone_name", &self.zone_name)
            .finish()
    }
}

impl AzureProvider {
    /// Create an Azure DNS provider from configuration.
    ///
    /// Fails fast when any zone identifier or service principal field is
    /// missing.
    pub fn new(
        name: impl Into<String>,
        config: &AzureConfig,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Result<Self> {
        let name = name.into();
        if config.subscription_id.is_empty() {
            return Err(Error::provider_init(&name, "subscription ID is required"));
        }
        if config.resource_group_name.is_empty() {
            return Err(Error::provider_init(&name, "resource group name is required"));
        }
        if config.zone_name.is_empty() {
            return Err(Error::provider_init(&name, "zone name is required"));
        }
        if config.tenant_id.is_empty() {
            return Err(Error::provider_init(&name, "tenant ID is required"));
        }
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(Error::provider_init(
                &name,
                "client ID and client secret are required",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::provider_init(&name, format!("building HTTP client: {e}")))?;

        Ok(Self {
            name,
            subscription_id: config.subscription_id.clone(),
            resource_group_name: config.resource_group_name.clone(),
            zone_name: config.zone_name.clone(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            management_base: MANAGEMENT_BASE.to_string(),
            login_base: LOGIN_BASE.to_string(),
            client,
            metrics,
            token_cache: Mutex::new(None),
        })
    }

    /// Override the Resource Manager base URL (tests, proxies)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.management_base = api_base.into();
        self
    }

    /// Override the token endpoint base URL (tests)
    pub fn with_login_base(mut self, login_base: impl Into<String>) -> Self {
        self.login_base = login_base.into();
        self
    }

    fn api_error(&self, message: String) -> Error {
        Error::provider(&self.name, message)
    }

    fn record_set_path(&self, record_name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}/A/{}",
            self.subscription_id, self.resource_group_name, self.zone_name, record_name
        )
    }

    fn record_metric(&self, method: &str, path: &str, ok: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_api_call("azure", method, path, ok, start.elapsed());
        }
    }

    /// Map a domain to its record-set name within the zone: the apex is
    /// "@", subdomains lose the zone suffix.
    fn record_name_for(&self, domain: &str) -> String {
        let domain = domain.trim_end_matches('.');
        if domain == self.zone_name {
            return "@".to_string();
        }
        match domain.strip_suffix(&format!(".{}", self.zone_name)) {
            Some(sub) => sub.to_string(),
            None => domain.to_string(),
        }
    }

    /// Get a bearer token, reusing the cached one while it is fresh
    async fn access_token(&self) -> std::result::Result<String, String> {
        {
            let cache = self.token_cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", TOKEN_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| format!("error getting access token: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "error getting access token: HTTP {}; response: {body}",
                status.as_u16()
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("error decoding token response: {e}"))?;

        let mut cache = self.token_cache.lock();
        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(token.access_token)
    }

    async fn get_existing_ips(&self, domain: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}/A",
            self.subscription_id, self.resource_group_name, self.zone_name
        );
        let result = self.get_existing_ips_inner(domain, &path).await;
        self.record_metric("GET", &path, result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error getting existing records: {e}")))
    }

    async fn get_existing_ips_inner(
        &self,
        domain: &str,
        path: &str,
    ) -> std::result::Result<Vec<String>, String> {
        let token = self.access_token().await?;
        let record_name = self.record_name_for(domain);

        let response = self
            .client
            .get(format!("{}{path}", self.management_base))
            .query(&[
                ("api-version", API_VERSION),
                ("$recordsetnamesuffix", record_name.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "invalid response status code HTTP {}; response: {body}",
                status.as_u16()
            ));
        }

        let listing: RecordSetListing = response
            .json()
            .await
            .map_err(|e| format!("error decoding response: {e}"))?;

        // The suffix filter can match sibling names; keep the exact one
        let mut ips = Vec::new();
        for record_set in listing.value {
            if record_set.name != record_name || record_set.properties.a_records.is_empty() {
                continue;
            }
            ips.extend(
                record_set
                    .properties
                    .a_records
                    .into_iter()
                    .map(|r| r.ipv4_address),
            );
        }

        Ok(ips)
    }

    async fn put_record_set(&self, record_name: &str, ips: &[Ipv4Addr], ttl: u32) -> Result<()> {
        let start = Instant::now();
        let path = self.record_set_path(record_name);
        let result = self.put_record_set_inner(&path, ips, ttl).await;
        self.record_metric("PUT", &path, result.is_ok(), start);
        result.map_err(|e| {
            self.api_error(format!("error creating/updating record {record_name}: {e}"))
        })
    }

    async fn put_record_set_inner(
        &self,
        path: &str,
        ips: &[Ipv4Addr],
        ttl: u32,
    ) -> std::result::Result<(), String> {
        let token = self.access_token().await?;

        let a_records: Vec<serde_json::Value> = ips
            .iter()
            .map(|ip| serde_json::json!({ "ipv4Address": ip.to_string() }))
            .collect();
        let body = serde_json::json!({
            "properties": {
                "TTL": ttl,
                "ARecords": a_records,
            }
        });

        let response = self
            .client
            .put(format!("{}{path}", self.management_base))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

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

    async fn delete_record_set(&self, record_name: &str) -> Result<()> {
        let start = Instant::now();
        let path = self.record_set_path(record_name);
        let result = self.delete_record_set_inner(&path).await;
        self.record_metric("DELETE", &path, result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error deleting record {record_name}: {e}")))
    }

    async fn delete_record_set_inner(&self, path: &str) -> std::result::Result<(), String> {
        let token = self.access_token().await?;

        let response = self
            .client
            .delete(format!("{}{path}", self.management_base))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        // 404 means the record-set is already gone, which is the goal
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
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
impl DnsProvider for AzureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_records(&self, domain: &str, ttl: u32, desired_ips: &[Ipv4Addr]) -> Result<()> {
        let current_ips = self.get_existing_ips(domain).await?;
        let record_name = self.record_name_for(domain);

        if desired_ips.is_empty() {
            if current_ips.is_empty() {
                // No record to delete
                return Ok(());
            }

            debug!(record_name, "no published IPs, deleting record-set");
            return self.delete_record_set(&record_name).await;
        }

        let mut desired: Vec<String> = desired_ips.iter().map(Ipv4Addr::to_string).collect();
        let mut current = current_ips;
        desired.sort_unstable();
        current.sort_unstable();

        if desired == current {
            debug!(record_name, "record-set already matches, skipping write");
            return Ok(());
        }

        debug!(record_name, ips = ?desired_ips, "writing record-set");
        self.put_record_set(&record_name, desired_ips, ttl).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct RecordSetListing {
    #[serde(default)]
    value: Vec<RecordSet>,
}

#[derive(Debug, Deserialize)]
struct RecordSet {
    #[serde(default)]
    name: String,
    properties: RecordSetProperties,
}

#[derive(Debug, Deserialize)]
struct RecordSetProperties {
    #[serde(default, rename = "ARecords")]
    a_records: Vec<ARecord>,
}

#[derive(Debug, Deserialize)]
struct ARecord {
    #[serde(rename = "ipv4Address")]
    ipv4_address: String,
}
