// Venue-specific wire knowledge: upstream subscribe frames and payload shapes.
// Everything venue-agnostic (canonical symbols, validation, stamping) lives in
// the normaliser.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::types::EventType;
use crate::error::NormalizationError;

pub mod binance;
pub mod coinbase;
pub mod generic;
pub mod kraken;

/// A price or size as it appears on the wire: venues disagree on whether
/// numbers are quoted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Text(String),
    Number(serde_json::Number),
}

impl WireNumber {
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            WireNumber::Text(s) => parse_decimal(s.trim()),
            WireNumber::Number(n) => parse_decimal(&n.to_string()),
        }
    }

    pub fn raw(&self) -> String {
        match self {
            WireNumber::Text(s) => s.clone(),
            WireNumber::Number(n) => n.to_string(),
        }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// One market observation still in venue spelling, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrade {
    pub symbol: Option<String>,
    pub price: Option<WireNumber>,
    pub quantity: Option<WireNumber>,
    pub kind: EventType,
}

pub type RawBatch = SmallVec<[RawTrade; 1]>;

pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Frames to send right after the upstream handshake.
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String>;

    /// Extracts the market observations carried by one upstream text frame.
    fn parse_frame(&self, raw: &str) -> Result<RawBatch, NormalizationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Coinbase,
    Kraken,
    /// Already-canonical JSON, for local or test feeds.
    Generic,
}

impl Venue {
    pub fn adapter(self) -> &'static dyn VenueAdapter {
        match self {
            Venue::Binance => &binance::BinanceAdapter,
            Venue::Coinbase => &coinbase::CoinbaseAdapter,
            Venue::Kraken => &kraken::KrakenAdapter,
            Venue::Generic => &generic::GenericAdapter,
        }
    }

    pub fn default_url(self) -> Option<&'static str> {
        match self {
            Venue::Binance => Some(binance::DEFAULT_WS_URL),
            Venue::Coinbase => Some(coinbase::DEFAULT_WS_URL),
            Venue::Kraken => Some(kraken::DEFAULT_WS_URL),
            Venue::Generic => None,
        }
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "coinbase" => Ok(Venue::Coinbase),
            "kraken" => Ok(Venue::Kraken),
            "generic" => Ok(Venue::Generic),
            other => Err(format!("unknown venue `{other}`")),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Venue::Binance => "binance",
            Venue::Coinbase => "coinbase",
            Venue::Kraken => "kraken",
            Venue::Generic => "generic",
        };
        f.write_str(name)
    }
}
