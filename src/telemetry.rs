use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!("feedgate_events_published_total", "Canonical events handed to the broadcaster");
    describe_counter!("feedgate_deliveries_total", "Frames placed on client outbound queues");
    describe_counter!("feedgate_frames_dropped_total", "Oldest frames evicted from full client queues");
    describe_counter!("feedgate_normalization_failures_total", "Upstream frames dropped as malformed");
    describe_counter!("feedgate_connect_attempts_total", "Upstream connect attempts");
    describe_counter!("feedgate_upstream_failures_total", "Upstream connect or read failures");
    describe_gauge!("feedgate_ws_connections", "Open client WebSocket sessions");
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "prometheus exporter listening");
    metrics::gauge!("feedgate_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_addr: std::net::SocketAddr) -> anyhow::Result<()> {
    describe_metrics();
    Ok(())
}
