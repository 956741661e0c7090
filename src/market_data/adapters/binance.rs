// Binance spot trade streams.
// Source: https://binance-docs.github.io/apidocs/spot/en/#trade-streams

use serde::Deserialize;
use smallvec::smallvec;

use super::{RawBatch, RawTrade, Venue, VenueAdapter, WireNumber};
use crate::error::NormalizationError;
use crate::market_data::canonical::canonicalize;
use crate::market_data::types::EventType;

pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

// {"e":"trade","E":1700000000000,"s":"BTCUSDT","t":1,"p":"50000.10","q":"0.001","T":1700000000000,"m":true}
#[derive(Debug, Deserialize)]
struct TradeMsg {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: Option<String>,
    #[serde(rename = "p")]
    price: Option<WireNumber>,
    #[serde(rename = "q")]
    quantity: Option<WireNumber>,
}

pub struct BinanceAdapter;

impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let params: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@trade", canonicalize(s).as_str().to_lowercase()))
            .collect();
        vec![serde_json::json!({ "method": "SUBSCRIBE", "params": params, "id": 1 }).to_string()]
    }

    fn parse_frame(&self, raw: &str) -> Result<RawBatch, NormalizationError> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined streams wrap the payload: {"stream":"btcusdt@trade","data":{..}}
        if value.get("stream").is_some() {
            if let Some(data) = value.get_mut("data") {
                value = data.take();
            }
        }

        if value.get("e").is_none() {
            if value.get("result").is_some() || value.get("id").is_some() {
                return Err(NormalizationError::NotMarketData("subscription response".into()));
            }
            return Err(NormalizationError::Malformed("binance frame without event type".into()));
        }

        let msg: TradeMsg = serde_json::from_value(value)?;
        match msg.event.as_str() {
            "trade" | "aggTrade" => Ok(smallvec![RawTrade {
                symbol: msg.symbol,
                price: msg.price,
                quantity: msg.quantity,
                kind: EventType::Trade,
            }]),
            other => Err(NormalizationError::NotMarketData(format!("binance event `{other}`"))),
        }
    }
}
