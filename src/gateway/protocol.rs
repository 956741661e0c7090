// WebSocket wire messages.
//
// Client to server: `{"action":"subscribe"|"unsubscribe","symbols":[..],"exchange":..}`.
// Server to client: a bare [`MarketEvent`] or a [`StatusNotice`].

use serde::{Deserialize, Serialize};

use crate::market_data::outbound::Frame;
use crate::market_data::types::{ConnectorState, ExchangeFilter, MarketEvent};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientCommand {
    Subscribe {
        #[serde(default)]
        symbols: Vec<String>,
        /// Omitted, `null` and `"any"` all mean every exchange.
        #[serde(default)]
        exchange: Option<String>,
    },
    Unsubscribe {
        #[serde(default)]
        symbols: Vec<String>,
        #[serde(default)]
        exchange: Option<String>,
    },
}

impl ClientCommand {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn exchange_filter(&self) -> ExchangeFilter {
        let (ClientCommand::Subscribe { exchange, .. } | ClientCommand::Unsubscribe { exchange, .. }) = self;
        ExchangeFilter::from_option(exchange.as_deref())
    }
}

/// `{"type":"exchange_status","exchange":"binance","status":"degraded"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "exchange_status")]
pub struct StatusNotice {
    pub exchange: String,
    pub status: ConnectorState,
}

impl StatusNotice {
    pub fn new(exchange: &str, status: ConnectorState) -> Self {
        Self {
            exchange: exchange.to_string(),
            status,
        }
    }
}

pub fn encode_event(event: &MarketEvent) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(event).map(Frame::from)
}

pub fn encode_notice(notice: &StatusNotice) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(notice).map(Frame::from)
}
