// Wires configured exchanges to connectors sharing one normaliser and broadcaster.

use std::sync::Arc;

use tracing::info;

use super::broadcaster::Broadcaster;
use super::connector::ExchangeConnector;
use super::normaliser::Normaliser;
use super::transport::FeedTransport;
use crate::config::GatewayConfig;

pub fn build_normaliser(config: &GatewayConfig) -> Normaliser {
    let mut normaliser = Normaliser::new();
    for exchange in &config.exchanges {
        normaliser.register(&exchange.id, exchange.venue);
    }
    normaliser
}

/// One connector per configured exchange, in config order.
pub fn build_connectors(
    config: &GatewayConfig,
    transport: Arc<dyn FeedTransport>,
    broadcaster: Arc<Broadcaster>,
) -> Vec<ExchangeConnector> {
    let normaliser = Arc::new(build_normaliser(config));
    config
        .exchanges
        .iter()
        .map(|exchange| {
            info!(
                exchange = %exchange.id,
                venue = %exchange.venue,
                url = exchange.url.as_deref().unwrap_or("<simulated>"),
                symbols = exchange.symbols.len(),
                "configured exchange"
            );
            ExchangeConnector::new(
                exchange,
                &config.simulator,
                transport.clone(),
                normaliser.clone(),
                broadcaster.clone(),
            )
        })
        .collect()
}
