//! OVH DNS provider.
//!
//! Record-oriented like Cloudflare: each A value is an independent record
//! with a numeric ID, diffed with per-record deletes and creates. The
//! list endpoint only returns IDs, so each record needs a detail GET.
//!
//! Every request is signed: OVH's scheme is
//! `"$1$" + sha1_hex(secret "+" consumer "+" METHOD "+" url "+" body "+" timestamp)`
//! carried in `X-Ovh-*` headers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use ddup_core::config::OvhConfig;
use ddup_core::{AppMetrics, DnsProvider, Error, Result};

/// Timeout for each API call
const API_TIMEOUT: Duration = Duration::from_secs(20);

/// Map a configured endpoint to the full API base URL.
///
/// Known regions map to their API hosts; anything else is treated as a
/// full URL (with any trailing slash removed).
fn ovh_endpoint(endpoint: Option<&str>) -> String {
    match endpoint.unwrap_or("") {
        "" | "eu" => "https://eu.api.ovh.com/1.0".to_string(),
        "ca" => "https://ca.api.ovh.com/1.0".to_string(),
        "us" => "https://api.us.ovhcloud.com/1.0".to_string(),
        other => other.trim_end_matches('/').to_string(),
    }
}

/// OVH DNS provider
pub struct OvhProvider {
    name: String,
    api_key: String,
    api_secret: String,
    consumer_key: String,
    zone_name: String,
    endpoint: String,
    client: reqwest::Client,
    metrics: Option<Arc<AppMetrics>>,
}

// Credentials never appear in Debug output
impl fmt::Debug for OvhProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OvhProvider")
            .field("name", &self.name)
            .field("zone_name", &self.zone_name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl OvhProvider {
    /// Create an OVH provider from configuration.
    ///
    /// Fails fast when any of the credentials or the zone name is missing.
    pub fn new(
        name: impl Into<String>,
        config: &OvhConfig,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Result<Self> {
        let name = name.into();
        if config.api_key.is_empty() {
            return Err(Error::provider_init(&name, "API key is required"));
        }
        if config.api_secret.is_empty() {
            return Err(Error::provider_init(&name, "API secret is required"));
        }
        if config.consumer_key.is_empty() {
            return Err(Error::provider_init(&name, "consumer key is required"));
        }
        if config.zone_name.is_empty() {
            return Err(Error::provider_init(&name, "zone name is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::provider_init(&name, format!("building HTTP client: {e}")))?;

        Ok(Self {
            name,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            consumer_key: config.consumer_key.clone(),
            zone_name: config.zone_name.clone(),
            endpoint: ovh_endpoint(config.endpoint.as_deref()),
            client,
            metrics,
        })
    }

    /// Override the API base URL (tests, proxies)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.endpoint = api_base.into();
        self
    }

    fn api_error(&self, message: String) -> Error {
        Error::provider(&self.name, message)
    }

    fn record_metric(&self, method: &str, ok: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_api_call(
                "ovh",
                method,
                &format!("/domain/zone/{}/record", self.zone_name),
                ok,
                start.elapsed(),
            );
        }
    }

    /// Extract the subdomain relative to the configured zone.
    ///
    /// The zone apex maps to an empty subdomain; domains outside the zone
    /// are an error.
    fn subdomain_for(&self, domain: &str) -> std::result::Result<String, String> {
        if domain == self.zone_name {
            return Ok(String::new());
        }
        match domain.strip_suffix(&format!(".{}", self.zone_name)) {
            Some(sub) if !sub.is_empty() => Ok(sub.to_string()),
            _ => Err(format!(
                "domain {domain} is not a subdomain of zone {}",
                self.zone_name
            )),
        }
    }

    fn signature(&self, method: &str, url: &str, body: &str, timestamp: &str) -> String {
        let data = format!(
            "{}+{}+{}+{}+{}+{}",
            self.api_secret, self.consumer_key, method, url, body, timestamp
        );
        let hash = Sha1::digest(data.as_bytes());
        format!("$1${}", hex::encode(hash))
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&impl Serialize>,
    ) -> std::result::Result<reqwest::Response, String> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| format!("system clock error: {e}"))?
            .as_secs()
            .to_string();

        let body_data = match body {
            Some(value) => {
                serde_json::to_string(value).map_err(|e| format!("error marshalling request body: {e}"))?
            }
            None => String::new(),
        };

        let signature = self.signature(method.as_str(), url, &body_data, &timestamp);

        let mut request = self
            .client
            .request(method, url)
            .header("X-Ovh-Application", &self.api_key)
            .header("X-Ovh-Consumer", &self.consumer_key)
            .header("X-Ovh-Signature", signature)
            .header("X-Ovh-Timestamp", timestamp);

        if !body_data.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_data);
        }

        let response = request
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

        Ok(response)
    }

    /// Signed request that decodes a JSON response, enforcing the content
    /// type
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<T, String> {
        let response = self.signed_request(method, url, body).await?;

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type != "application/json" && !content_type.starts_with("application/json;") {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "invalid response Content-Type '{content_type}'; response: {body}"
            ));
        }

        response
            .json()
            .await
            .map_err(|e| format!("error decoding JSON response: {e}"))
    }

    async fn get_existing_records(&self, domain: &str) -> Result<Vec<OvhRecord>> {
        let start = Instant::now();
        let result = self.get_existing_records_inner(domain).await;
        self.record_metric("GET", result.is_ok(), start);
        result.map_err(|e| self.api_error(format!("error getting existing records: {e}")))
    }

    async fn get_existing_records_inner(
        &self,
        domain: &str,
    ) -> std::result::Result<Vec<OvhRecord>, String> {
        let sub_domain = self.subdomain_for(domain)?;
        let url = format!(
            "{}/domain/zone/{}/record?fieldType=A&subDomain={}",
            self.endpoint, self.zone_name, sub_domain
        );

        let record_ids: Vec<i64> = self.request_json(reqwest::Method::GET, &url, None).await?;

        let mut records = Vec::with_capacity(record_ids.len());
        for record_id in record_ids {
            let url = format!(
                "{}/domain/zone/{}/record/{}",
                self.endpoint, self.zone_name, record_id
            );
            let record: OvhRecord = self
                .request_json(reqwest::Method::GET, &url, None)
                .await
                .map_err(|e| format!("error getting record details for ID {record_id}: {e}"))?;

            if record.id != record_id {
                return Err(format!(
                    "record ID mismatches in response: got '{}' but expected '{record_id}'",
                    record.id
                ));
            }
            records.push(record);
        }

        Ok(records)
    }

    async fn delete_record(&self, record_id: i64, ip: &str) -> Result<()> {
        let start = Instant::now();
        let url = format!(
            "{}/domain/zone/{}/record/{}",
            self.endpoint, self.zone_name, record_id
        );
        let result = self
            .signed_request(reqwest::Method::DELETE, &url, None::<&serde_json::Value>)
            .await;
        self.record_metric("DELETE", result.is_ok(), start);
        result
            .map(|_| ())
            .map_err(|e| self.api_error(format!("error deleting record {record_id} for IP {ip}: {e}")))
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
        let sub_domain = self.subdomain_for(domain)?;
        let url = format!("{}/domain/zone/{}/record", self.endpoint, self.zone_name);

        let body = serde_json::json!({
            "fieldType": "A",
            "subDomain": sub_domain,
            "target": ip,
            "ttl": ttl,
        });

        self.signed_request(reqwest::Method::POST, &url, Some(&body))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DnsProvider for OvhProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_records(&self, domain: &str, ttl: u32, desired_ips: &[Ipv4Addr]) -> Result<()> {
        let existing_records = self.get_existing_records(domain).await?;

        let existing: HashMap<String, i64> = existing_records
            .into_iter()
            .map(|record| (record.target, record.id))
            .collect();

        let desired: HashSet<String> = desired_ips.iter().map(Ipv4Addr::to_string).collect();

        // Deletes before creates
        for (ip, record_id) in &existing {
            if desired.contains(ip) {
                continue;
            }

            debug!(ip, record_id, "deleting record for unpublished IP");
            self.delete_record(*record_id, ip).await?;
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

/// A DNS record from the OVH API
#[derive(Debug, Clone, Deserialize)]
struct OvhRecord {
    id: i64,
    target: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> OvhConfig {
        OvhConfig {
            api_key: "app-key".to_string(),
            api_secret: "app-secret".to_string(),
            consumer_key: "consumer-key".to_string(),
            zone_name: "example.com".to_string(),
            endpoint: None,
        }
    }

    fn provider_for(server: &MockServer) -> OvhProvider {
        OvhProvider::new("test", &config(), None)
            .unwrap()
            .with_api_base(server.uri())
    }

    #[test]
    fn endpoint_mapping() {
        assert_eq!(ovh_endpoint(None), "https://eu.api.ovh.com/1.0");
        assert_eq!(ovh_endpoint(Some("eu")), "https://eu.api.ovh.com/1.0");
        assert_eq!(ovh_endpoint(Some("ca")), "https://ca.api.ovh.com/1.0");
        assert_eq!(ovh_endpoint(Some("us")), "https://api.us.ovhcloud.com/1.0");
        assert_eq!(
            ovh_endpoint(Some("https://api.example.com/1.0/")),
            "https://api.example.com/1.0"
        );
    }

    #[test]
    fn subdomain_extraction() {
        let provider = OvhProvider::new("test", &config(), None).unwrap();

        assert_eq!(provider.subdomain_for("example.com").unwrap(), "");
        assert_eq!(provider.subdomain_for("app.example.com").unwrap(), "app");
        assert_eq!(
            provider.subdomain_for("a.b.example.com").unwrap(),
            "a.b"
        );
        assert!(provider.subdomain_for("other.org").is_err());
        assert!(provider.subdomain_for("badexample.com").is_err());
    }

    #[test]
    fn signature_shape_is_stable() {
        let provider = OvhProvider::new("test", &config(), None).unwrap();

        let sig = provider.signature("GET", "https://eu.api.ovh.com/1.0/x", "", "1700000000");
        assert!(sig.starts_with("$1$"));
        assert_eq!(sig.len(), 3 + 40);
        assert!(sig[3..].chars().all(|c| c.is_ascii_hexdigit()));

        // Deterministic, and sensitive to every signed component
        let same = provider.signature("GET", "https://eu.api.ovh.com/1.0/x", "", "1700000000");
        assert_eq!(sig, same);
        let other = provider.signature("GET", "https://eu.api.ovh.com/1.0/x", "{}", "1700000000");
        assert_ne!(sig, other);
    }

    #[test]
    fn constructor_validates_required_fields() {
        let mut cfg = config();
        cfg.api_key.clear();
        let err = OvhProvider::new("test", &cfg, None).unwrap_err();
        assert!(err.to_string().contains("API key"));

        let mut cfg = config();
        cfg.api_secret.clear();
        let err = OvhProvider::new("test", &cfg, None).unwrap_err();
        assert!(err.to_string().contains("API secret"));

        let mut cfg = config();
        cfg.consumer_key.clear();
        let err = OvhProvider::new("test", &cfg, None).unwrap_err();
        assert!(err.to_string().contains("consumer key"));

        let mut cfg = config();
        cfg.zone_name.clear();
        let err = OvhProvider::new("test", &cfg, None).unwrap_err();
        assert!(err.to_string().contains("zone name"));
    }

    #[tokio::test]
    async fn diff_deletes_stale_and_creates_missing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record"))
            .and(query_param("fieldType", "A"))
            .and(query_param("subDomain", "app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([111, 222])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record/111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 111, "fieldType": "A", "subDomain": "app",
                "target": "1.2.3.4", "ttl": 60, "zone": "example.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record/222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 222, "fieldType": "A", "subDomain": "app",
                "target": "5.6.7.8", "ttl": 60, "zone": "example.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/domain/zone/example.com/record/111"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/domain/zone/example.com/record"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 333, "fieldType": "A", "subDomain": "app",
                "target": "9.9.9.9", "ttl": 60, "zone": "example.com"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        provider
            .update_records(
                "app.example.com",
                60,
                &[Ipv4Addr::new(5, 6, 7, 8), Ipv4Addr::new(9, 9, 9, 9)],
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        // list + 2 details + delete + create
        assert_eq!(requests.len(), 5);

        // Every request carries the signing headers
        for request in &requests {
            for header in [
                "X-Ovh-Application",
                "X-Ovh-Consumer",
                "X-Ovh-Signature",
                "X-Ovh-Timestamp",
            ] {
                assert!(
                    request.headers.contains_key(header),
                    "missing header {header} on {} {}",
                    request.method,
                    request.url
                );
            }
        }

        let create = requests.last().unwrap();
        assert_eq!(create.method.as_str(), "POST");
        let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
        assert_eq!(body["fieldType"], "A");
        assert_eq!(body["subDomain"], "app");
        assert_eq!(body["target"], "9.9.9.9");
        assert_eq!(body["ttl"], 60);
    }

    #[tokio::test]
    async fn record_id_mismatch_is_a_schema_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([111])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record/111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 999, "fieldType": "A", "subDomain": "app",
                "target": "1.2.3.4", "ttl": 60, "zone": "example.com"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .update_records("app.example.com", 60, &[Ipv4Addr::new(1, 2, 3, 4)])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("record ID mismatches"));
    }

    #[tokio::test]
    async fn matching_state_issues_no_mutations() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([111])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record/111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 111, "fieldType": "A", "subDomain": "app",
                "target": "1.2.3.4", "ttl": 60, "zone": "example.com"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        provider
            .update_records("app.example.com", 60, &[Ipv4Addr::new(1, 2, 3, 4)])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
    }
}
