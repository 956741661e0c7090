// HTTP surface and process lifecycle.
//
// `Gateway::serve` spawns one task per exchange connector plus the status
// heartbeat, then runs axum until the shutdown future resolves. On shutdown
// connectors are told to stop, outbound queues are closed so every write
// loop drains what it already holds, connector tasks are joined, and `serve`
// returns only once every client session has detached (or a timeout passes).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::ws::ws_handler;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::market_data::broadcaster::Broadcaster;
use crate::market_data::canonical::CanonicalSymbol;
use crate::market_data::connector::{ConnectorHandle, ExchangeConnector};
use crate::market_data::router::build_connectors;
use crate::market_data::transport::{FeedTransport, WsTransport};
use crate::market_data::types::{ConnectorState, MarketEvent};

const CONNECTOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared by every route and WebSocket session.
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub connectors: Vec<ConnectorHandle>,
}

impl AppState {
    pub fn exchanges(&self) -> Vec<String> {
        self.connectors.iter().map(|h| h.exchange().to_string()).collect()
    }

    /// `ok` only while every connector is live.
    pub fn health(&self) -> HealthReport {
        let connectors: BTreeMap<String, ConnectorState> = self
            .connectors
            .iter()
            .map(|h| (h.exchange().to_string(), h.status()))
            .collect();
        let healthy = connectors.values().all(|s| *s == ConnectorState::Connected);
        HealthReport {
            status: if healthy { "ok" } else { "degraded" },
            connectors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connectors: BTreeMap<String, ConnectorState>,
}

#[derive(Debug, Serialize)]
pub struct MarketDataResponse {
    pub status: &'static str,
    pub exchanges: Vec<String>,
    pub symbols: Vec<CanonicalSymbol>,
    pub data: Vec<MarketEvent>,
}

pub struct Gateway {
    config: GatewayConfig,
    state: Arc<AppState>,
    connectors: Vec<ExchangeConnector>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn FeedTransport>) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.server.queue_capacity));
        let connectors = build_connectors(&config, transport, broadcaster.clone());
        let state = Arc::new(AppState {
            broadcaster,
            connectors: connectors.iter().map(ExchangeConnector::handle).collect(),
        });
        Self { config, state, connectors }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let Gateway { config, state, connectors } = self;
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks: Vec<JoinHandle<()>> = connectors
            .into_iter()
            .map(|connector| tokio::spawn(connector.run(stop_rx.clone())))
            .collect();
        if let Some(period) = config.server.status_interval() {
            tokio::spawn(status_heartbeat(state.clone(), period, stop_rx.clone()));
        }

        let addr = listener.local_addr()?;
        info!(%addr, exchanges = state.connectors.len(), "gateway listening");

        let signal_state = state.clone();
        let signal = async move {
            shutdown.await;
            info!("shutdown requested, stopping connectors");
            let _ = stop_tx.send(true);
            signal_state.broadcaster.close_all();
        };

        axum::serve(listener, create_router(state.clone()))
            .with_graceful_shutdown(signal)
            .await?;

        for task in tasks {
            match tokio::time::timeout(CONNECTOR_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "connector task failed"),
                Err(_) => warn!("connector did not stop in time"),
            }
        }
        // upgraded sessions outlive axum's graceful shutdown; wait for their write loops
        state.broadcaster.close_all();
        if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, state.broadcaster.wait_idle())
            .await
            .is_err()
        {
            warn!(
                remaining = state.broadcaster.connection_count(),
                "client sessions did not drain in time"
            );
        }
        info!("gateway stopped");
        Ok(())
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/api/market_data", get(market_data))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/api/market_data", "/ws"],
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health())
}

async fn market_data(State(state): State<Arc<AppState>>) -> Json<MarketDataResponse> {
    let snapshot = state.broadcaster.snapshot();
    Json(MarketDataResponse {
        status: "success",
        exchanges: state.exchanges(),
        symbols: snapshot.symbols(),
        data: snapshot.entries(),
    })
}

/// Re-sends every connector's state to interested clients once per `period`.
async fn status_heartbeat(state: Arc<AppState>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                for handle in &state.connectors {
                    state.broadcaster.publish_status(handle.exchange(), handle.status());
                }
            }
        }
    }
    debug!("status heartbeat stopped");
}
