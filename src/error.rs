// Error types for every stage of the gateway.
//
// Only `ConfigError` is ever fatal; the others are recovered where they
// occur and surface as log lines, metrics and `exchange_status` notices.

use std::time::Duration;

use rust_decimal::Decimal;

/// A raw upstream frame that could not be turned into a canonical event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Subscription acks, heartbeats and other control traffic.
    #[error("not market data: {0}")]
    NotMarketData(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("trade price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("quantity must not be negative, got {0}")]
    NegativeQuantity(Decimal),

    #[error("no payload shape registered for exchange `{0}`")]
    UnknownExchange(String),
}

impl NormalizationError {
    /// Control traffic is expected on every feed and is not worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(self, NormalizationError::NotMarketData(_))
    }
}

impl From<serde_json::Error> for NormalizationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Transient upstream failures. All of them feed the reconnect loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream closed the connection")]
    Closed,

    #[error("no upstream frame within {0:?}")]
    ReadTimeout(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Io(io) => Self::Transport(io.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("http server error: {0}")]
    Serve(#[from] std::io::Error),
}
