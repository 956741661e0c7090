// Last-seen event per (exchange, symbol), served by GET /api/market_data.

use ahash::AHashMap;
use itertools::Itertools;
use parking_lot::RwLock;

use super::canonical::CanonicalSymbol;
use super::types::{EventType, MarketEvent};

#[derive(Debug, Default)]
pub struct MarketSnapshot {
    latest: RwLock<AHashMap<(String, CanonicalSymbol), MarketEvent>>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps trades and quotes; status events carry no price worth serving.
    pub fn record(&self, event: &MarketEvent) {
        if event.event_type == EventType::Status {
            return;
        }
        self.latest
            .write()
            .insert((event.exchange.clone(), event.symbol.clone()), event.clone());
    }

    /// Every entry, ordered by exchange then symbol.
    pub fn entries(&self) -> Vec<MarketEvent> {
        let latest = self.latest.read();
        latest
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn symbols(&self) -> Vec<CanonicalSymbol> {
        let latest = self.latest.read();
        latest.keys().map(|(_, symbol)| symbol.clone()).unique().sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
