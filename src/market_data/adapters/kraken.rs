// Kraken websocket v2 trade and ticker channels.
// Source: https://docs.kraken.com/api/docs/websocket-v2/trade

use serde::Deserialize;

use super::{RawBatch, RawTrade, Venue, VenueAdapter, WireNumber};
use crate::error::NormalizationError;
use crate::market_data::types::EventType;

pub const DEFAULT_WS_URL: &str = "wss://ws.kraken.com/v2";

// {"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":50000.1,"qty":0.01,...}]}
#[derive(Debug, Deserialize)]
struct ChannelMsg {
    channel: Option<String>,
    #[serde(default)]
    data: Vec<Entry>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    symbol: Option<String>,
    price: Option<WireNumber>,
    qty: Option<WireNumber>,
    // ticker entries
    last: Option<WireNumber>,
    volume: Option<WireNumber>,
}

pub struct KrakenAdapter;

impl VenueAdapter for KrakenAdapter {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![serde_json::json!({
            "method": "subscribe",
            "params": { "channel": "trade", "symbol": symbols },
        })
        .to_string()]
    }

    fn parse_frame(&self, raw: &str) -> Result<RawBatch, NormalizationError> {
        let msg: ChannelMsg = serde_json::from_str(raw)?;
        if let Some(method) = msg.method {
            return Err(NormalizationError::NotMarketData(format!("kraken `{method}` response")));
        }
        let channel = msg
            .channel
            .ok_or_else(|| NormalizationError::Malformed("kraken frame without channel".into()))?;

        let batch: RawBatch = match channel.as_str() {
            "trade" => msg
                .data
                .into_iter()
                .map(|entry| RawTrade {
                    symbol: entry.symbol,
                    price: entry.price,
                    quantity: entry.qty,
                    kind: EventType::Trade,
                })
                .collect(),
            "ticker" => msg
                .data
                .into_iter()
                .map(|entry| RawTrade {
                    symbol: entry.symbol,
                    price: entry.last,
                    quantity: entry.volume,
                    kind: EventType::Quote,
                })
                .collect(),
            other => return Err(NormalizationError::NotMarketData(format!("kraken `{other}`"))),
        };

        if batch.is_empty() {
            return Err(NormalizationError::NotMarketData("kraken frame without entries".into()));
        }
        Ok(batch)
    }
}
