// Convert venue payloads into canonical MarketEvents.
// Venue shape is delegated to the adapters; this layer canonicalizes the
// symbol, validates numbers and stamps receipt time.

use ahash::AHashMap;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::trace;

use super::adapters::{RawTrade, Venue, WireNumber};
use super::canonical::canonicalize;
use super::types::{EventType, MarketEvent, ReceiptClock};
use crate::error::NormalizationError;

pub type EventBatch = SmallVec<[MarketEvent; 1]>;

/// Maps each configured exchange id to the payload shape it speaks.
#[derive(Debug, Default, Clone)]
pub struct Normaliser {
    venues: AHashMap<String, Venue>,
}

impl Normaliser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, exchange: &str, venue: Venue) {
        self.venues.insert(exchange.to_string(), venue);
    }

    pub fn venue_of(&self, exchange: &str) -> Option<Venue> {
        self.venues.get(exchange).copied()
    }

    /// Turns one raw upstream frame into zero or more canonical events.
    ///
    /// A single bad entry fails the whole frame; the caller drops it and keeps
    /// reading.
    pub fn normalize(
        &self,
        exchange: &str,
        raw: &str,
        clock: &ReceiptClock,
    ) -> Result<EventBatch, NormalizationError> {
        let venue = self
            .venue_of(exchange)
            .ok_or_else(|| NormalizationError::UnknownExchange(exchange.to_string()))?;

        let batch = venue.adapter().parse_frame(raw)?;
        let events = batch
            .into_iter()
            .map(|raw_trade| to_event(exchange, raw_trade, clock))
            .collect::<Result<EventBatch, _>>()?;

        trace!(exchange, count = events.len(), "normalized frame");
        Ok(events)
    }
}

fn to_event(exchange: &str, raw: RawTrade, clock: &ReceiptClock) -> Result<MarketEvent, NormalizationError> {
    let symbol = raw
        .symbol
        .as_deref()
        .map(canonicalize)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizationError::MissingField("symbol"))?;

    let price = decimal_field("price", raw.price.as_ref())?.ok_or(NormalizationError::MissingField("price"))?;
    let quantity = decimal_field("quantity", raw.quantity.as_ref())?.unwrap_or(Decimal::ZERO);

    // Quotes may legitimately carry a zero price (empty side); trades may not.
    let price_ok = match raw.kind {
        EventType::Trade => price > Decimal::ZERO,
        _ => price >= Decimal::ZERO,
    };
    if !price_ok {
        return Err(NormalizationError::NonPositivePrice(price));
    }
    if quantity < Decimal::ZERO {
        return Err(NormalizationError::NegativeQuantity(quantity));
    }

    Ok(MarketEvent {
        exchange: exchange.to_string(),
        symbol,
        price: price.normalize(),
        quantity: quantity.normalize(),
        event_type: raw.kind,
        timestamp: clock.stamp(),
        simulated: false,
    })
}

fn decimal_field(field: &'static str, value: Option<&WireNumber>) -> Result<Option<Decimal>, NormalizationError> {
    match value {
        None => Ok(None),
        Some(wire) => wire
            .to_decimal()
            .map(Some)
            .ok_or_else(|| NormalizationError::InvalidNumber { field, value: wire.raw() }),
    }
}
