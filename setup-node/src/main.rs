use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use setup_node::api::{start_api_server, ApiState};
use setup_node::cluster::ResourceClient;
use setup_node::config::SetupConfig;
use setup_node::domain::DomainMigration;
use setup_node::health::HealthState;
use setup_node::static_ips::StaticIpMigration;
use setup_node::telemetry;
use setup_node::transport::{ReqwestSender, RetryingTransport};
use setup_node::OpensslIssuer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from file if available, otherwise use defaults
    let (config, load_error) = match SetupConfig::from_file("config/default") {
        Ok(config) => (config, None),
        Err(e) => (SetupConfig::default(), Some(e)),
    };

    telemetry::init_logging(&config.logging);
    info!("Starting setup-node v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Configuration loaded from config/default.toml"),
        Some(e) => warn!("Failed to load config file: {}, using defaults", e),
    }

    config.validate().context("Invalid configuration")?;
    telemetry::start_metrics_exporter(&config.metrics)?;

    let sender = ReqwestSender::from_config(&config.cluster).context("Failed to build HTTP client")?;
    let transport = RetryingTransport::new(Arc::new(sender), config.retry.clone());
    let client = Arc::new(ResourceClient::new(transport, config.cluster.api_url.clone()));
    info!(api_url = %config.cluster.api_url, "Cluster API client ready");

    let issuer = Arc::new(OpensslIssuer::new(&config.certificates));
    let domain = Arc::new(DomainMigration::new(
        Arc::clone(&client),
        issuer,
        config.domain.clone(),
        config.certificates.secret_namespace.clone(),
    ));
    let static_ips = Arc::new(StaticIpMigration::new(Arc::clone(&client)));

    let service_account_token = config
        .cluster
        .service_account_token()
        .context("Service account token not found")?;
    let health = Arc::new(HealthState::new(
        Arc::clone(&client),
        service_account_token,
        config.cluster.frontend_url.clone(),
    ));

    let shutdown = CancellationToken::new();
    let ping_loop = Arc::clone(&health).spawn_ping_loop(config.cluster.ping_interval(), shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    let state = ApiState {
        domain,
        static_ips,
        health,
    };
    start_api_server(&config.server, state, shutdown.clone()).await?;

    shutdown.cancel();
    if let Err(e) = ping_loop.await {
        warn!(error = %e, "API server ping loop ended abnormally");
    }
    info!("setup-node stopped");
    Ok(())
}
