use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use feedgate::telemetry::{init_metrics, init_tracing};
use feedgate::{Gateway, GatewayConfig};

/// Real-time market data gateway: normalizes exchange feeds and fans them
/// out to WebSocket subscribers.
#[derive(Debug, Parser)]
#[command(name = "feedgate", version, about)]
struct Cli {
    /// Config file (TOML, YAML or JSON); FEEDGATE__* env vars override it
    #[arg(short, long, env = "FEEDGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, default_value = "info,feedgate=debug")]
    log: String,

    /// Never open upstream links; every exchange is served by the simulator
    #[arg(long)]
    simulate_only: bool,

    /// Prometheus exporter address (only with the metrics-exporter feature)
    #[arg(long, default_value = "0.0.0.0:9000")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let cli = Cli::parse();
    init_tracing(&cli.log);
    init_metrics(cli.metrics_addr)?;

    let mut config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if cli.simulate_only {
        config.simulate_only();
    }
    config.validate()?;

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;

    info!(
        bind = %config.server.bind,
        exchanges = config.exchanges.len(),
        simulate_only = cli.simulate_only,
        "starting feedgate"
    );

    let gateway = Gateway::new(config);
    if let Err(e) = gateway.serve(listener, shutdown_signal()).await {
        error!(error = %e, "gateway exited with error");
        return Err(e.into());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
