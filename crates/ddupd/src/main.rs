//! ddupd: the ddup daemon.
//!
//! A thin integration layer: load and validate configuration, set up
//! logging and metrics, construct the configured DNS providers, then run
//! the health engine (and the status server when enabled) until a
//! termination signal arrives. All reconciliation logic lives in
//! `ddup-core`.

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ddup_core::config::{LogsConfig, MetricsConfig, ProviderConfig};
use ddup_core::{AppMetrics, Config, DnsProvider, Error, HealthEngine, ProviderRegistry, StatusSource};
use ddup_provider_azure::AzureProvider;
use ddup_provider_cloudflare::CloudflareProvider;
use ddup_provider_ovh::OvhProvider;
use ddup_provider_unifi::UnifiProvider;

/// Health-checked dynamic DNS updater
#[derive(Debug, Parser)]
#[command(name = "ddupd", version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Exit codes: 0 clean shutdown, 1 configuration or startup error,
/// 2 unexpected runtime error
#[derive(Debug, Clone, Copy)]
enum DdupExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DdupExitCode> for ExitCode {
    fn from(code: DdupExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (config, config_path) = match Config::load(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error loading config file: {e}");
            return DdupExitCode::ConfigError.into();
        }
    };

    if let Err(e) = init_logging(&config.logs) {
        eprintln!("failed to initialize logging: {e}");
        return DdupExitCode::ConfigError.into();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "starting ddup"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to create tokio runtime");
            return DdupExitCode::RuntimeError.into();
        }
    };

    let code = runtime.block_on(async {
        match run_daemon(config).await {
            Ok(()) => {
                info!("shutdown complete");
                DdupExitCode::CleanShutdown
            }
            Err(e @ (Error::Config(_) | Error::ProviderInit { .. })) => {
                error!(error = %e, "initialization failed");
                DdupExitCode::ConfigError
            }
            Err(e) => {
                error!(error = %e, "daemon error");
                DdupExitCode::RuntimeError
            }
        }
    });

    code.into()
}

async fn run_daemon(config: Config) -> ddup_core::Result<()> {
    let metrics = init_metrics(&config.metrics)?;
    let providers = build_providers(&config, metrics.clone())?;
    let engine = Arc::new(HealthEngine::new(&config, &providers, metrics)?);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if config.server.enabled {
        let status: Arc<dyn StatusSource> = engine.clone();
        tokio::try_join!(
            engine.run(cancel.clone()),
            ddup_server::run(&config.server, status, cancel.clone()),
        )?;
    } else {
        engine.run(cancel).await?;
    }

    Ok(())
}

fn init_logging(logs: &LogsConfig) -> ddup_core::Result<()> {
    let level = match logs.level.to_lowercase().as_str() {
        "" | "info" => "info",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        other => {
            return Err(Error::config(format!("invalid value for 'logs.level': {other}")));
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JSON output by default when not attached to a terminal
    let json = logs.json.unwrap_or_else(|| !std::io::stdout().is_terminal());
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

fn init_metrics(config: &MetricsConfig) -> ddup_core::Result<Option<Arc<AppMetrics>>> {
    let Some(addr) = config.prometheus_addr else {
        return Ok(None);
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::config(format!("failed to start Prometheus exporter: {e}")))?;

    info!(%addr, "Prometheus metrics exporter started");
    Ok(Some(Arc::new(AppMetrics::new())))
}

fn build_providers(
    config: &Config,
    metrics: Option<Arc<AppMetrics>>,
) -> ddup_core::Result<ProviderRegistry> {
    let registry = ProviderRegistry::new();

    for (name, provider_config) in &config.providers {
        let provider: Arc<dyn DnsProvider> = match provider_config {
            ProviderConfig::Cloudflare(cfg) => {
                Arc::new(CloudflareProvider::new(name, cfg, metrics.clone())?)
            }
            ProviderConfig::Ovh(cfg) => Arc::new(OvhProvider::new(name, cfg, metrics.clone())?),
            ProviderConfig::Azure(cfg) => Arc::new(AzureProvider::new(name, cfg, metrics.clone())?),
            ProviderConfig::Unifi(cfg) => Arc::new(UnifiProvider::new(name, cfg, metrics.clone())?),
        };

        info!(provider = name, kind = provider_config.kind(), "initialized DNS provider");
        registry.register(name.clone(), provider);
    }

    Ok(registry)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for ctrl-c");
    }
}
