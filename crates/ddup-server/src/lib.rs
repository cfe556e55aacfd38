//! Read-only status HTTP surface.
//!
//! Exposes the engine's [`StatusSource`] as JSON for the dashboard:
//! `GET /healthz`, `GET /api/status`, `GET /api/status/{record_name}`,
//! plus the embedded dashboard page at `/`. The surface never mutates
//! engine state.

use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ddup_core::config::ServerConfig;
use ddup_core::{Error, Result, StatusSource};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Maximum accepted request body
const MAX_BODY_BYTES: usize = 1024;

/// Dashboard cache lifetime, in seconds
const DASHBOARD_CACHE_MAX_AGE: i64 = 24 * 60 * 60;

/// The dashboard is a single self-contained page, embedded at build time
const DASHBOARD_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
struct AppState {
    status: Arc<dyn StatusSource>,
    /// Last-Modified for the embedded dashboard: process start
    started: DateTime<Utc>,
}

/// Build the status router.
///
/// Middleware, outermost first: panic recovery, request body limit,
/// permissive CORS (only when `enable_cors` is set), access log.
pub fn create_router(status: Arc<dyn StatusSource>, enable_cors: bool) -> Router {
    let state = AppState {
        status,
        started: Utc::now(),
    };

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(all_domains_status))
        .route("/api/status/{record_name}", get(domain_status))
        .route("/", get(dashboard))
        .with_state(state)
        .layer(middleware::from_fn(access_log));

    if enable_cors {
        router = router.layer(middleware::from_fn(permissive_cors));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(recover_panics))
}

/// Run the server until the token is cancelled
pub async fn run(
    config: &ServerConfig,
    status: Arc<dyn StatusSource>,
    cancel: CancellationToken,
) -> Result<()> {
    let router = create_router(status, config.enable_cors);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("failed to create TCP listener on {addr}: {e}")))?;

    info!(bind = %config.bind, port = config.port, "status server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("status server stopped");
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn all_domains_status(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, &state.status.all_domains())
}

async fn domain_status(
    State(state): State<AppState>,
    Path(record_name): Path<String>,
) -> Response {
    if record_name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "record name is empty");
    }

    match state.status.domain(&record_name) {
        Some(status) => json_response(StatusCode::OK, &status),
        None => error_response(StatusCode::NOT_FOUND, "domain not found"),
    }
}

async fn dashboard(State(state): State<AppState>, request: Request) -> Response {
    // Honour If-Modified-Since against the process start time
    if let Some(since) = request
        .headers()
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    {
        if state.started <= since.with_timezone(&Utc) + ChronoDuration::seconds(1) {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=86400"),
            ),
            (header::LAST_MODIFIED, http_date(&state.started)),
        ],
        DASHBOARD_HTML,
    )
        .into_response()
}

fn http_date(time: &DateTime<Utc>) -> HeaderValue {
    let formatted = time.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    HeaderValue::from_str(&formatted).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Serialize a JSON response without HTML escaping and with an explicit
/// charset
fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response {
    match serde_json::to_vec(data) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "error writing JSON response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Catch handler panics and turn them into a 500 instead of tearing down
/// the connection task
async fn recover_panics(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "handler panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

/// Development-only CORS: allow any origin
async fn permissive_cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                (
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                ),
                (
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("GET, OPTIONS"),
                ),
                (
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static("*"),
                ),
            ],
        )
            .into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use ddup_core::status::{DomainStatus, EndpointStatus};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    struct StubSource(BTreeMap<String, DomainStatus>);

    impl StatusSource for StubSource {
        fn all_domains(&self) -> BTreeMap<String, DomainStatus> {
            self.0.clone()
        }

        fn domain(&self, record_name: &str) -> Option<DomainStatus> {
            self.0.get(record_name).cloned()
        }
    }

    fn stub() -> Arc<dyn StatusSource> {
        let mut domains = BTreeMap::new();
        domains.insert(
            "app.example.com".to_string(),
            DomainStatus {
                last_updated: Some("2024-05-01T10:00:00Z".parse().unwrap()),
                provider: "cf".to_string(),
                error: None,
                endpoints: vec![
                    EndpointStatus {
                        ip: Ipv4Addr::new(1, 1, 1, 1),
                        healthy: true,
                        failure_count: 0,
                    },
                    EndpointStatus {
                        ip: Ipv4Addr::new(2, 2, 2, 2),
                        healthy: false,
                        failure_count: 4,
                    },
                ],
            },
        );
        Arc::new(StubSource(domains))
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_no_content() {
        let router = create_router(stub(), false);
        let response = router.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn all_status_returns_json_map() {
        let router = create_router(stub(), false);
        let response = router.oneshot(get("/api/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let status = &json["app.example.com"];
        assert_eq!(status["provider"], "cf");
        assert_eq!(status["endpoints"][0]["ip"], "1.1.1.1");
        assert_eq!(status["endpoints"][0]["healthy"], true);
        assert_eq!(status["endpoints"][1]["failureCount"], 4);
    }

    #[tokio::test]
    async fn single_domain_status_and_not_found() {
        let router = create_router(stub(), false);

        let response = router
            .clone()
            .oneshot(get("/api/status/app.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(get("/api/status/other.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "domain not found");
    }

    #[tokio::test]
    async fn dashboard_is_cached_for_a_day() {
        let router = create_router(stub(), false);
        let response = router.clone().oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=86400"
        );
        assert!(response.headers().contains_key(header::LAST_MODIFIED));

        // A client whose copy is newer than process start gets a 304
        let in_the_future = (Utc::now() + ChronoDuration::hours(1))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let request = HttpRequest::builder()
            .uri("/")
            .header(header::IF_MODIFIED_SINCE, in_the_future)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn cors_headers_only_when_enabled() {
        let router = create_router(stub(), true);
        let response = router.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );

        let router = create_router(stub(), false);
        let response = router.oneshot(get("/healthz")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    async fn boom_handler() -> &'static str {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn handler_panic_becomes_a_500() {
        let router: Router = Router::new()
            .route("/boom", axum::routing::get(boom_handler))
            .layer(middleware::from_fn(recover_panics));

        let response = router.oneshot(get("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
