// Feeds that already speak the canonical shape:
// {"symbol":"BTCUSDT","price":"50000","quantity":"0.1","type":"trade"}

use serde::Deserialize;
use smallvec::smallvec;

use super::{RawBatch, RawTrade, Venue, VenueAdapter, WireNumber};
use crate::error::NormalizationError;
use crate::market_data::types::EventType;

#[derive(Debug, Deserialize)]
struct CanonicalMsg {
    symbol: Option<String>,
    price: Option<WireNumber>,
    quantity: Option<WireNumber>,
    #[serde(rename = "type", default)]
    kind: Option<EventType>,
}

pub struct GenericAdapter;

impl VenueAdapter for GenericAdapter {
    fn venue(&self) -> Venue {
        Venue::Generic
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![serde_json::json!({ "action": "subscribe", "symbols": symbols }).to_string()]
    }

    fn parse_frame(&self, raw: &str) -> Result<RawBatch, NormalizationError> {
        let msg: CanonicalMsg = serde_json::from_str(raw)?;
        match msg.kind {
            Some(EventType::Status) => Err(NormalizationError::NotMarketData("status frame".into())),
            kind => Ok(smallvec![RawTrade {
                symbol: msg.symbol,
                price: msg.price,
                quantity: msg.quantity,
                kind: kind.unwrap_or(EventType::Trade),
            }]),
        }
    }
}
