use std::{net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use kinv_api::InProcApi;
use kinv_collect::{parse_interval, KubeDomains, Orchestrator};
use kinv_credentials::CredentialManager;
use kinv_deliver::{AckCache, Deliverer};
use kinv_store::SnapshotStore;
use tokio::signal;
use tracing::{info, warn};

mod config;

use config::{Config, LogFormatter};

fn init_tracing(level: &str, formatter: LogFormatter) {
    let filter = tracing_subscriber::EnvFilter::from_str(level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match formatter {
        LogFormatter::Json => tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).init(),
        LogFormatter::Text => tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init(),
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KINV_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KINV_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "listening for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_tracing(&cfg.log_level, cfg.log_formatter);
    init_metrics();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval = %cfg.collect_interval,
        upload = cfg.upload_inventory,
        endpoint = %cfg.server_api_endpoint,
        "kinv agent starting"
    );

    let store = Arc::new(SnapshotStore::new());
    let acks = Arc::new(AckCache::new());
    let source = Arc::new(KubeDomains::new(cfg.client_options()));
    let mut orchestrator = Orchestrator::new(source, store.clone(), parse_interval(&cfg.collect_interval));

    let mut renewal = None;
    if cfg.upload_inventory {
        let credentials = Arc::new(CredentialManager::initialize(&cfg.tls_crt, &cfg.tls_key, cfg.auth_enabled));
        renewal = Some(credentials.clone().spawn());
        let deliverer = Deliverer::new(&cfg.server_api_endpoint, cfg.delivery_timeout, credentials, acks.clone())
            .context("building delivery client")?;
        orchestrator = orchestrator.with_publisher(Arc::new(deliverer));
    } else {
        info!("inventory upload disabled");
    }
    let collector = tokio::spawn(orchestrator.run());

    let app = kinv_api::router(Arc::new(InProcApi::new(store, acks)));
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "serving read api");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("serving read api")?;

    collector.abort();
    if let Some(handle) = renewal {
        handle.abort();
    }
    Ok(())
}
