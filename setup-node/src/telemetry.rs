use anyhow::{Context, Result};
use metrics::describe_counter;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, MetricsConfig};

/// Initialize structured logging; `RUST_LOG` overrides the configured level
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.level.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Initialize metrics descriptions
pub fn describe_metrics() {
    describe_counter!(
        "setup_transport_attempts_total",
        "Requests sent to the cluster API, retries included"
    );
    describe_counter!(
        "setup_transport_retries_total",
        "Cluster API requests repeated after a transient failure"
    );
    describe_counter!(
        "setup_domain_changes_total",
        "Domain change requests by outcome"
    );
    describe_counter!(
        "setup_static_ip_hosts_total",
        "Hosts whose network policy was patched or created"
    );
    describe_counter!(
        "setup_route_rehost_failures_total",
        "Routes that could not be moved to the new ingress domain"
    );
}

/// Install the Prometheus exporter when enabled
pub fn start_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        info!("Metrics exporter is disabled");
        return Ok(());
    }

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid metrics address {}", config.listen_addr))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    describe_metrics();

    info!(metrics_addr = %listen_addr, "Prometheus metrics exporter started");
    Ok(())
}
