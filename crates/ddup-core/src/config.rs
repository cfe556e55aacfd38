//! Configuration types for ddup.
//!
//! The configuration is loaded from a YAML file. Unknown fields are
//! rejected, so typos fail fast instead of being silently ignored.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable pointing at the config file
pub const CONFIG_FILE_ENV_VAR: &str = "DDUP_CONFIG";

/// Default interval between health check passes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of consecutive failed probes before an endpoint is
/// removed from the published set
pub const DEFAULT_ATTEMPTS: u32 = 2;

/// Default TTL for created records, in seconds
pub const DEFAULT_TTL: u32 = 120;

/// Main ddup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Interval between health check passes
    #[serde(
        default = "default_interval",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub interval: Duration,

    /// Domains to manage, each with its own endpoints
    #[serde(default)]
    pub domains: Vec<DomainConfig>,

    /// Named DNS provider instances, referenced by domains
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Status server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logs: LogsConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// A single domain (DNS record name) and its endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DomainConfig {
    /// DNS record to update for this domain (e.g. "app.example.com")
    pub record_name: String,

    /// Name of the DNS provider as configured in the `providers` map
    pub provider: String,

    /// TTL for the created records, in seconds
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// What to do when every endpoint is past its failure allowance
    #[serde(default)]
    pub on_all_failed: AllFailedAction,

    /// Health check tuning for this domain's endpoints
    #[serde(default)]
    pub health_checks: HealthCheckConfig,

    /// Endpoints to health check for this domain
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Behavior when no endpoint of a domain is considered healthy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllFailedAction {
    /// Leave the provider's records untouched, so the last known IPs keep
    /// serving. Default: a monitoring outage must not black-hole the record.
    #[default]
    Preserve,

    /// Publish the empty set, deleting the record at the provider.
    Delete,
}

/// Health check tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckConfig {
    /// Per-probe request timeout
    #[serde(
        default = "default_probe_timeout",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub timeout: Duration,

    /// Consecutive failed probes required before an endpoint is removed
    /// from the published set. Must be at least 1.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

/// A single endpoint to health check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EndpointConfig {
    /// Endpoint name, used for logging and metrics. Defaults to the URL.
    #[serde(default)]
    pub name: String,

    /// Health check URL
    pub url: String,

    /// IPv4 address to include in DNS records while this endpoint is healthy
    pub ip: Ipv4Addr,

    /// Hostname to send in requests instead of the one in `url`.
    /// Useful when `url` is addressed by IP or by a different name; also
    /// used for TLS SNI where possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Configuration for one named provider instance.
///
/// Externally tagged: each entry in the `providers` map must contain
/// exactly one adaptor-specific block, e.g.
/// `{ cloudflare: { apiToken: "...", zoneId: "..." } }`. Unknown adaptors
/// and entries with zero or multiple blocks are rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Cloudflare DNS
    Cloudflare(CloudflareConfig),
    /// OVH DNS
    Ovh(OvhConfig),
    /// Azure DNS
    Azure(AzureConfig),
    /// Unifi controller static DNS
    Unifi(UnifiConfig),
}

impl ProviderConfig {
    /// The adaptor kind, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Cloudflare(_) => "cloudflare",
            ProviderConfig::Ovh(_) => "ovh",
            ProviderConfig::Azure(_) => "azure",
            ProviderConfig::Unifi(_) => "unifi",
        }
    }
}

/// Cloudflare-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CloudflareConfig {
    /// API token with DNS edit permissions on the zone
    pub api_token: String,
    /// Zone ID containing the managed records
    pub zone_id: String,
}

/// OVH-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OvhConfig {
    /// Application key
    pub api_key: String,
    /// Application secret
    pub api_secret: String,
    /// Consumer key
    pub consumer_key: String,
    /// DNS zone name (e.g. "example.com")
    pub zone_name: String,
    /// API endpoint: "eu" (default), "ca", "us", or a full URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Azure DNS-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AzureConfig {
    /// Subscription containing the DNS zone
    pub subscription_id: String,
    /// Resource group containing the DNS zone
    pub resource_group_name: String,
    /// DNS zone name (e.g. "example.com")
    pub zone_name: String,
    /// Entra tenant ID
    pub tenant_id: String,
    /// Service principal client ID
    pub client_id: String,
    /// Service principal client secret
    pub client_secret: String,
}

/// Unifi-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnifiConfig {
    /// Controller base URL (e.g. "https://192.168.1.1")
    pub host: String,
    /// Controller API key
    pub api_key: String,
    /// Site name, defaults to "default"
    #[serde(default)]
    pub site: String,
    /// Set when the controller is standalone (not UnifiOS), which changes
    /// the API path prefix
    #[serde(default)]
    pub external_controller: bool,
    /// Skip TLS certificate verification (self-signed controllers)
    #[serde(default)]
    pub skip_tls_verify: bool,
}

/// Status server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// Enable the status server
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from anywhere (development only)
    #[serde(default)]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
            port: default_port(),
            enable_cors: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogsConfig {
    /// Log level: `debug`, `info` (default), `warn`, `error`
    #[serde(default)]
    pub level: String,

    /// Emit logs as JSON. Defaults to false when stdout is a TTY,
    /// true otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address for the Prometheus exporter to listen on (e.g.
    /// "127.0.0.1:9464"). Metrics are disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Config {
    /// Load the configuration, resolving the file location.
    ///
    /// Resolution order: `path` (CLI flag), the `DDUP_CONFIG` environment
    /// variable, then `config.yaml` (and `config.yml`) in the current
    /// directory, `~/.ddup`, and `/etc/ddup`.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let file = match path {
            Some(p) => p.to_path_buf(),
            None => Self::discover_config_file()?,
        };

        let contents = std::fs::read_to_string(&file).map_err(|e| {
            Error::config(format!("failed to open config file '{}': {e}", file.display()))
        })?;
        let mut cfg: Config = serde_yaml::from_str(&contents).map_err(|e| {
            Error::config(format!("failed to decode config file '{}': {e}", file.display()))
        })?;
        cfg.validate()?;

        Ok((cfg, file))
    }

    fn discover_config_file() -> Result<PathBuf> {
        if let Some(from_env) = std::env::var_os(CONFIG_FILE_ENV_VAR) {
            let p = PathBuf::from(from_env);
            if !p.is_file() {
                return Err(Error::config(format!(
                    "environment variable {CONFIG_FILE_ENV_VAR} points to a file that does not exist"
                )));
            }
            return Ok(p);
        }

        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(home) = std::env::var_os("HOME") {
            search_dirs.push(PathBuf::from(home).join(".ddup"));
        }
        search_dirs.push(PathBuf::from("/etc/ddup"));

        // It's .yaml, not .yml. But if you really, really want to use
        // .yml, that works too.
        for file_name in ["config.yaml", "config.yml"] {
            for dir in &search_dirs {
                let candidate = dir.join(file_name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(Error::config(
            "could not find a configuration file config.yaml in the current folder, '~/.ddup', or '/etc/ddup'",
        ))
    }

    /// Validate the configuration and normalize defaults that depend on
    /// other fields.
    pub fn validate(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("interval must be greater than zero"));
        }

        if self.providers.is_empty() {
            return Err(Error::config("at least one provider must be configured"));
        }

        if self.domains.is_empty() {
            return Err(Error::config(
                "no domains configured; specify at least one domain under 'domains'",
            ));
        }

        for (di, d) in self.domains.iter_mut().enumerate() {
            if d.record_name.is_empty() {
                return Err(Error::config(format!("domain {di} is invalid: recordName is empty")));
            }
            if d.provider.is_empty() {
                return Err(Error::config(format!("domain {di} is invalid: provider is empty")));
            }
            if !self.providers.contains_key(&d.provider) {
                return Err(Error::config(format!(
                    "domain '{}' references DNS provider '{}' that is not configured",
                    d.record_name, d.provider
                )));
            }
            if d.endpoints.is_empty() {
                return Err(Error::config(format!(
                    "domain {} is invalid: endpoints list is empty",
                    d.record_name
                )));
            }
            if d.ttl == 0 {
                d.ttl = DEFAULT_TTL;
            }
            if d.health_checks.attempts == 0 {
                return Err(Error::config(format!(
                    "domain {} is invalid: healthChecks.attempts must be at least 1",
                    d.record_name
                )));
            }

            for (ei, e) in d.endpoints.iter_mut().enumerate() {
                if e.url.is_empty() {
                    return Err(Error::config(format!(
                        "domain {} endpoint {ei} is invalid: url is empty",
                        d.record_name
                    )));
                }
                if e.name.is_empty() {
                    e.name = e.url.clone();
                }
            }
        }

        Ok(())
    }
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7401
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s)
        .map_err(|e| serde::de::Error::custom(format!("invalid duration '{s}': {e}")))
}

fn ser_duration<S>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*d).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
interval: 15s
domains:
  - recordName: app.example.com
    provider: cf
    ttl: 300
    healthChecks:
      timeout: 1s
      attempts: 3
    endpoints:
      - name: host-a
        url: "https://10.0.0.1/healthz"
        ip: 10.0.0.1
        host: app.example.com
      - url: "http://10.0.0.2/healthz"
        ip: 10.0.0.2
providers:
  cf:
    cloudflare:
      apiToken: token
      zoneId: zone
server:
  enabled: true
  port: 8080
"#;

    #[test]
    fn parses_full_config() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.interval, Duration::from_secs(15));
        assert_eq!(cfg.domains.len(), 1);

        let d = &cfg.domains[0];
        assert_eq!(d.record_name, "app.example.com");
        assert_eq!(d.ttl, 300);
        assert_eq!(d.on_all_failed, AllFailedAction::Preserve);
        assert_eq!(d.health_checks.timeout, Duration::from_secs(1));
        assert_eq!(d.health_checks.attempts, 3);
        assert_eq!(d.endpoints[0].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(d.endpoints[0].host.as_deref(), Some("app.example.com"));
        // Name falls back to the URL
        assert_eq!(d.endpoints[1].name, "http://10.0.0.2/healthz");

        assert!(matches!(cfg.providers["cf"], ProviderConfig::Cloudflare(_)));
        assert!(cfg.server.enabled);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn applies_defaults() {
        let yaml = r#"
domains:
  - recordName: app.example.com
    provider: cf
    endpoints:
      - url: "http://10.0.0.1/healthz"
        ip: 10.0.0.1
providers:
  cf:
    cloudflare:
      apiToken: token
      zoneId: zone
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.interval, DEFAULT_INTERVAL);
        assert_eq!(cfg.domains[0].ttl, DEFAULT_TTL);
        assert_eq!(cfg.domains[0].health_checks.timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(cfg.domains[0].health_checks.attempts, DEFAULT_ATTEMPTS);
        assert!(!cfg.server.enabled);
        assert_eq!(cfg.server.port, 7401);
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "interval: 30s\nbogus: true\n";
        let res: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_invalid_duration() {
        let yaml = "interval: soon\n";
        let err = serde_yaml::from_str::<Config>(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn rejects_multiple_provider_blocks() {
        let yaml = r#"
providers:
  both:
    cloudflare:
      apiToken: token
      zoneId: zone
    unifi:
      host: "https://192.168.1.1"
      apiKey: key
"#;
        let res: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_unknown_provider_kind() {
        let yaml = r#"
providers:
  p:
    route53:
      accessKey: a
"#;
        let res: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(res.is_err());
    }

    #[test]
    fn validate_requires_known_provider_reference() {
        let yaml = r#"
domains:
  - recordName: app.example.com
    provider: missing
    endpoints:
      - url: "http://10.0.0.1/healthz"
        ip: 10.0.0.1
providers:
  cf:
    cloudflare:
      apiToken: token
      zoneId: zone
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn validate_requires_endpoints() {
        let yaml = r#"
domains:
  - recordName: app.example.com
    provider: cf
    endpoints: []
providers:
  cf:
    cloudflare:
      apiToken: token
      zoneId: zone
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("endpoints list is empty"));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let yaml = r#"
domains:
  - recordName: app.example.com
    provider: cf
    healthChecks:
      attempts: 0
    endpoints:
      - url: "http://10.0.0.1/healthz"
        ip: 10.0.0.1
providers:
  cf:
    cloudflare:
      apiToken: token
      zoneId: zone
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }
}
