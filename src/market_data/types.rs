// Canonical event schema and the small value types shared across the pipeline.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::canonical::CanonicalSymbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Trade,
    Quote,
    Status,
}

/// One normalized market observation, identical in shape for every venue
/// and for the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub exchange: String,
    pub symbol: CanonicalSymbol,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Receipt time, strictly increasing per exchange (see [`ReceiptClock`]).
    pub timestamp: DateTime<Utc>,
    pub simulated: bool,
}

/// Upstream link state of one exchange connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    /// Upstream is unhealthy and the simulator is substituting for it.
    Degraded,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Connected => "connected",
            ConnectorState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange half of a subscription pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExchangeFilter {
    Exchange(String),
    AnyExchange,
}

impl ExchangeFilter {
    /// `None`, empty and `"any"` (any case) all mean every exchange.
    pub fn from_option(exchange: Option<&str>) -> Self {
        match exchange.map(str::trim) {
            None | Some("") => ExchangeFilter::AnyExchange,
            Some(id) if id.eq_ignore_ascii_case("any") => ExchangeFilter::AnyExchange,
            Some(id) => ExchangeFilter::Exchange(id.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, exchange: &str) -> bool {
        match self {
            ExchangeFilter::AnyExchange => true,
            ExchangeFilter::Exchange(id) => id == exchange,
        }
    }
}

impl fmt::Display for ExchangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeFilter::Exchange(id) => f.write_str(id),
            ExchangeFilter::AnyExchange => f.write_str("any"),
        }
    }
}

/// Wall-clock stamps that never repeat or go backwards.
///
/// One clock is shared by an exchange's live path and its simulator, so the
/// hand-over in either direction cannot produce a duplicate timestamp.
#[derive(Debug, Default)]
pub struct ReceiptClock {
    last_micros: AtomicI64,
}

impl ReceiptClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let previous = match self.last_micros.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        let stamped = now.max(previous + 1);
        DateTime::from_timestamp_micros(stamped).unwrap_or_else(Utc::now)
    }
}
