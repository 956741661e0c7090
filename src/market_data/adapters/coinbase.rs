// Coinbase Exchange websocket feed (matches + ticker channels).
// Source: https://docs.cloud.coinbase.com/exchange/docs/websocket-channels

use serde::Deserialize;
use smallvec::smallvec;

use super::{RawBatch, RawTrade, Venue, VenueAdapter, WireNumber};
use crate::error::NormalizationError;
use crate::market_data::types::EventType;

pub const DEFAULT_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

// {"type":"match","product_id":"BTC-USD","price":"50000.10","size":"0.01","time":"..."}
// {"type":"ticker","product_id":"BTC-USD","price":"50000.10","last_size":"0.01",...}
#[derive(Debug, Deserialize)]
struct FeedMsg {
    #[serde(rename = "type")]
    kind: String,
    product_id: Option<String>,
    price: Option<WireNumber>,
    size: Option<WireNumber>,
    last_size: Option<WireNumber>,
    message: Option<String>,
}

pub struct CoinbaseAdapter;

impl VenueAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![serde_json::json!({
            "type": "subscribe",
            "product_ids": symbols,
            "channels": ["matches", "ticker"],
        })
        .to_string()]
    }

    fn parse_frame(&self, raw: &str) -> Result<RawBatch, NormalizationError> {
        let msg: FeedMsg = serde_json::from_str(raw)?;
        let (kind, quantity) = match msg.kind.as_str() {
            "match" | "last_match" => (EventType::Trade, msg.size),
            "ticker" => (EventType::Quote, msg.last_size),
            "error" => {
                let reason = msg.message.unwrap_or_else(|| "unspecified".into());
                return Err(NormalizationError::NotMarketData(format!("coinbase error: {reason}")));
            }
            other => return Err(NormalizationError::NotMarketData(format!("coinbase `{other}`"))),
        };
        Ok(smallvec![RawTrade {
            symbol: msg.product_id,
            price: msg.price,
            quantity,
            kind,
        }])
    }
}
