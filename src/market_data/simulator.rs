// Synthetic canonical events for exchanges whose live feed is unavailable.
//
// A bounded random walk per symbol, anchored at a seed price. The walk keeps
// following the live price while the feed is healthy, so when it takes over
// it continues from where the real market left off.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use super::canonical::CanonicalSymbol;
use super::types::{EventType, MarketEvent, ReceiptClock};
use crate::config::SimulatorConfig;

/// Bounded multiplicative random walk.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    seed: f64,
    current: f64,
    lower: f64,
    upper: f64,
    step: f64,
}

impl RandomWalk {
    pub fn new(seed: f64, band_fraction: f64, step_fraction: f64) -> Self {
        Self {
            seed,
            current: seed,
            lower: seed * (1.0 - band_fraction),
            upper: seed * (1.0 + band_fraction),
            step: step_fraction,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn reset(&mut self) {
        self.current = self.seed;
    }

    /// Moves the walk to an observed price, clamped into the band.
    pub fn anchor(&mut self, price: f64) {
        if price.is_finite() {
            self.current = price.clamp(self.lower, self.upper);
        }
    }

    pub fn next_price<R: Rng>(&mut self, rng: &mut R) -> f64 {
        let change = rng.gen_range(-self.step..=self.step);
        self.current = (self.current * (1.0 + change)).clamp(self.lower, self.upper);
        self.current
    }
}

/// Lazy, infinite, restartable stream of synthetic events for one exchange.
///
/// Iterating yields one event per symbol in round-robin order. Timestamps come
/// from the exchange's shared [`ReceiptClock`].
pub struct SimulatorSource {
    exchange: String,
    walks: Vec<(CanonicalSymbol, RandomWalk)>,
    cursor: usize,
    rng: StdRng,
    clock: Arc<ReceiptClock>,
}

impl SimulatorSource {
    pub fn new(
        exchange: &str,
        symbols: &[CanonicalSymbol],
        config: &SimulatorConfig,
        clock: Arc<ReceiptClock>,
    ) -> Self {
        let walks = symbols
            .iter()
            .map(|symbol| {
                let walk = RandomWalk::new(config.seed_for(symbol), config.band_fraction, config.step_fraction);
                (symbol.clone(), walk)
            })
            .collect();

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            exchange: exchange.to_string(),
            walks,
            cursor: 0,
            rng,
            clock,
        }
    }

    /// Rewinds every walk to its seed.
    pub fn restart(&mut self) {
        self.cursor = 0;
        for (_, walk) in &mut self.walks {
            walk.reset();
        }
    }

    /// Tracks a live event so the walk resumes from the real price.
    pub fn observe(&mut self, event: &MarketEvent) {
        if event.simulated {
            return;
        }
        if let Some((_, walk)) = self.walks.iter_mut().find(|(s, _)| *s == event.symbol) {
            if let Some(price) = event.price.to_f64() {
                walk.anchor(price);
            }
        }
    }

    /// One event for every symbol.
    pub fn tick(&mut self) -> Vec<MarketEvent> {
        let n = self.walks.len();
        self.by_ref().take(n).collect()
    }
}

impl Iterator for SimulatorSource {
    type Item = MarketEvent;

    fn next(&mut self) -> Option<MarketEvent> {
        if self.walks.is_empty() {
            return None;
        }
        let idx = self.cursor % self.walks.len();
        self.cursor = (idx + 1) % self.walks.len();

        let (symbol, walk) = &mut self.walks[idx];
        let raw_price = walk.next_price(&mut self.rng);
        let price = round_price(raw_price, walk.bounds().0);

        let notional = self.rng.gen_range(10.0..=1_000.0);
        let quantity = Decimal::from_f64(notional / raw_price)
            .map(|q| q.round_dp(8))
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);

        Some(MarketEvent {
            exchange: self.exchange.clone(),
            symbol: symbol.clone(),
            price,
            quantity: quantity.normalize(),
            event_type: EventType::Trade,
            timestamp: self.clock.stamp(),
            simulated: true,
        })
    }
}

/// Two decimals for large prices, more for small ones; never rounds to zero.
fn round_price(price: f64, floor: f64) -> Decimal {
    let dp = if price >= 1_000.0 {
        2
    } else if price >= 1.0 {
        4
    } else {
        6
    };
    let rounded = Decimal::from_f64(price.max(floor))
        .map(|p| p.round_dp(dp))
        .unwrap_or(Decimal::ONE);
    if rounded > Decimal::ZERO {
        rounded.normalize()
    } else {
        Decimal::new(1, dp)
    }
}
