//! Single-endpoint HTTP prober.

use reqwest::header;
use reqwest::redirect;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::EndpointConfig;

/// Outcome of a single endpoint probe.
///
/// Probe failures never become [`crate::Error`] values; they are data the
/// reconciler counts.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Endpoint name, for logs and metrics
    pub endpoint: String,
    /// IP the endpoint contributes to DNS while healthy
    pub ip: Ipv4Addr,
    /// Whether the probe returned a 2xx response
    pub healthy: bool,
    /// Failure reason when unhealthy
    pub error: Option<String>,
    /// How long the probe took
    pub duration: Duration,
}

/// Probes one endpoint with a dedicated HTTP client.
///
/// The client is built once at startup with the endpoint's TLS and host
/// override baked in, so probing never mutates shared transport state.
///
/// Host override semantics: the `Host` header always carries the override.
/// For `https` URLs addressed by IP, the probe URL is rewritten to the
/// override host and the connection pinned back to the configured IP, so
/// TLS SNI carries the override as well. For `https` URLs addressed by
/// hostname, only the header is overridden.
pub struct EndpointProber {
    name: String,
    ip: Ipv4Addr,
    target: ProbeTarget,
}

enum ProbeTarget {
    Ready {
        client: reqwest::Client,
        url: reqwest::Url,
        host_header: Option<String>,
    },
    /// The endpoint URL did not parse or the client could not be built;
    /// every probe reports the stored reason.
    Invalid(String),
}

impl EndpointProber {
    /// Build a prober for one endpoint with the given per-probe timeout
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Self {
        let target = match build_target(endpoint, timeout) {
            Ok(target) => target,
            Err(reason) => ProbeTarget::Invalid(reason),
        };

        Self {
            name: endpoint.name.clone(),
            ip: endpoint.ip,
            target,
        }
    }

    /// Issue one GET probe.
    ///
    /// Returns Unhealthy on any non-2xx response, transport or TLS error,
    /// timeout, or cancellation. Redirects are not followed: the first
    /// response terminates the probe. The response body is discarded
    /// without being read.
    pub async fn probe(&self, cancel: &CancellationToken) -> ProbeOutcome {
        let start = Instant::now();

        let (client, url, host_header) = match &self.target {
            ProbeTarget::Invalid(reason) => {
                return self.unhealthy(reason.clone(), start.elapsed());
            }
            ProbeTarget::Ready {
                client,
                url,
                host_header,
            } => (client, url, host_header),
        };

        let mut request = client.get(url.clone());
        if let Some(host) = host_header {
            request = request.header(header::HOST, host.as_str());
        }

        let response = tokio::select! {
            response = request.send() => response,
            () = cancel.cancelled() => {
                return self.unhealthy("health check cancelled".to_string(), start.elapsed());
            }
        };

        match response {
            Ok(response) => {
                let status = response.status();
                drop(response);
                if status.is_success() {
                    ProbeOutcome {
                        endpoint: self.name.clone(),
                        ip: self.ip,
                        healthy: true,
                        error: None,
                        duration: start.elapsed(),
                    }
                } else {
                    self.unhealthy(format!("status code {}", status.as_u16()), start.elapsed())
                }
            }
            Err(e) => self.unhealthy(format!("HTTP request failed: {e}"), start.elapsed()),
        }
    }

    fn unhealthy(&self, error: String, duration: Duration) -> ProbeOutcome {
        ProbeOutcome {
            endpoint: self.name.clone(),
            ip: self.ip,
            healthy: false,
            error: Some(error),
            duration,
        }
    }
}

fn build_target(endpoint: &EndpointConfig, timeout: Duration) -> Result<ProbeTarget, String> {
    let mut url =
        reqwest::Url::parse(&endpoint.url).map_err(|e| format!("creating request: {e}"))?;

    let mut builder = reqwest::Client::builder()
        .user_agent(crate::USER_AGENT)
        .redirect(redirect::Policy::none())
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .timeout(timeout);

    let mut host_header = None;
    if let Some(host) = &endpoint.host {
        let url_ip: Option<IpAddr> = url.host_str().and_then(|h| h.parse().ok());
        match url_ip {
            Some(ip) if url.scheme() == "https" => {
                let port = url.port_or_known_default().unwrap_or(443);
                url.set_host(Some(host.as_str()))
                    .map_err(|e| format!("creating request: {e}"))?;
                builder = builder.resolve(host, SocketAddr::new(ip, port));
            }
            _ => {
                host_header = Some(host.clone());
            }
        }
    }

    let client = builder
        .build()
        .map_err(|e| format!("creating request: {e}"))?;

    Ok(ProbeTarget::Ready {
        client,
        url,
        host_header,
    })
}
