// Layered gateway configuration.
//
// Sources, later ones winning: built-in defaults, an optional config file
// (TOML, YAML or JSON, picked by extension), then `FEEDGATE__*` environment
// variables with `__` separating nested keys, e.g.
// `FEEDGATE__SERVER__BIND=127.0.0.1:3000`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::market_data::adapters::Venue;
use crate::market_data::canonical::{canonicalize, CanonicalSymbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub exchanges: Vec<ExchangeConfig>,
    pub simulator: SimulatorConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            exchanges: vec![
                ExchangeConfig::live(
                    "binance",
                    Venue::Binance,
                    &["BTCUSDT", "ETHUSDT", "SOLUSDT", "ADAUSDT"],
                ),
                ExchangeConfig::live("coinbase", Venue::Coinbase, &["BTC-USD", "ETH-USD"]),
                ExchangeConfig::live("kraken", Venue::Kraken, &["BTC/USD", "ETH/USD"]),
            ],
            simulator: SimulatorConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads and validates. Any error here is fatal at startup.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FEEDGATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: GatewayConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Drops every upstream URL so each exchange is served by the simulator.
    pub fn simulate_only(&mut self) {
        for exchange in &mut self.exchanges {
            exchange.url = None;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.queue_capacity == 0 {
            return invalid("server.queue_capacity must be at least 1".into());
        }
        if self.exchanges.is_empty() {
            return invalid("at least one exchange must be configured".into());
        }

        let mut seen = HashSet::new();
        for exchange in &self.exchanges {
            let id = exchange.id.trim();
            if id.is_empty() {
                return invalid("exchange id must not be empty".into());
            }
            if id.eq_ignore_ascii_case("any") {
                return invalid("`any` is reserved and cannot be an exchange id".into());
            }
            if id != id.to_ascii_lowercase() {
                return invalid(format!("exchange id `{id}` must be lowercase"));
            }
            if !seen.insert(id) {
                return invalid(format!("duplicate exchange id `{id}`"));
            }
            if exchange.backoff.initial_ms == 0 || exchange.backoff.initial_ms > exchange.backoff.max_ms {
                return invalid(format!(
                    "exchange `{id}`: backoff.initial_ms must be in 1..=backoff.max_ms"
                ));
            }
            if exchange.read_timeout_secs == 0 {
                return invalid(format!("exchange `{id}`: read_timeout_secs must be positive"));
            }
            if exchange.connect_timeout_ms == 0 {
                return invalid(format!("exchange `{id}`: connect_timeout_ms must be positive"));
            }
        }

        let sim = &self.simulator;
        if sim.tick_ms == 0 {
            return invalid("simulator.tick_ms must be positive".into());
        }
        if !(sim.step_fraction > 0.0 && sim.step_fraction < 1.0) {
            return invalid("simulator.step_fraction must be in (0, 1)".into());
        }
        if !(sim.band_fraction > 0.0 && sim.band_fraction < 1.0) {
            return invalid("simulator.band_fraction must be in (0, 1)".into());
        }
        if !(sim.default_seed.is_finite() && sim.default_seed > 0.0) {
            return invalid("simulator.default_seed must be positive".into());
        }
        if let Some((symbol, _)) = sim.seeds.iter().find(|(_, p)| !(p.is_finite() && **p > 0.0)) {
            return invalid(format!("simulator seed for `{symbol}` must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Outbound frames buffered per client before the oldest is dropped.
    pub queue_capacity: usize,
    /// Period of the `exchange_status` re-broadcast; 0 disables it.
    pub status_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
            queue_capacity: 256,
            status_interval_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: String,
    pub venue: Venue,
    /// Upstream websocket; `None` means this exchange is only ever simulated.
    #[serde(default)]
    pub url: Option<String>,
    /// Venue spelling, e.g. `BTC-USD` on Coinbase.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Consecutive failures before the simulator takes over.
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Upper bound on the TCP, TLS and WebSocket handshake together.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_degrade_after() -> u32 {
    1
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl ExchangeConfig {
    pub fn live(id: &str, venue: Venue, symbols: &[&str]) -> Self {
        Self {
            url: venue.default_url().map(str::to_string),
            ..Self::simulated(id, venue, symbols)
        }
    }

    pub fn simulated(id: &str, venue: Venue, symbols: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            venue,
            url: None,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            degrade_after: default_degrade_after(),
            backoff: BackoffConfig::default(),
            read_timeout_secs: default_read_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn canonical_symbols(&self) -> Vec<CanonicalSymbol> {
        let mut symbols: Vec<CanonicalSymbol> = self.symbols.iter().map(|s| canonicalize(s)).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: 500, max_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub tick_ms: u64,
    /// Largest single-step move as a fraction of the current price.
    pub step_fraction: f64,
    /// Walk is clamped to `seed * (1 ± band_fraction)`.
    pub band_fraction: f64,
    pub seeds: HashMap<String, f64>,
    pub default_seed: f64,
    /// Fixes the random walk for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let seeds = [
            ("BTCUSDT", 50_000.0),
            ("ETHUSDT", 3_000.0),
            ("SOLUSDT", 150.0),
            ("ADAUSDT", 1.5),
            ("BTCUSD", 50_000.0),
            ("ETHUSD", 3_000.0),
        ]
        .into_iter()
        .map(|(s, p)| (s.to_string(), p))
        .collect();

        Self {
            tick_ms: 100,
            step_fraction: 0.0025,
            band_fraction: 0.2,
            seeds,
            default_seed: 100.0,
            rng_seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Seed keys are matched canonically; file loaders may have changed their case.
    pub fn seed_for(&self, symbol: &CanonicalSymbol) -> f64 {
        self.seeds
            .iter()
            .find(|(key, _)| canonicalize(key) == *symbol)
            .map(|(_, price)| *price)
            .unwrap_or(self.default_seed)
    }
}
