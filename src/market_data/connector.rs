// Exchange connector.
//
// One task per exchange owns the upstream link, its reconnect loop and the
// simulator that stands in while the link is unhealthy:
//
// Disconnected -> Connecting -> Connected
//      ^               |            |
//      +---- failure --+------------+
//      after `degrade_after` consecutive failures: Degraded (simulator on)
//      Degraded -> Connected on the next successful connect (simulator off)
//
// The simulator is ticked from the same `select!` loop that waits on
// upstream I/O and backoff sleeps, so only one source ever publishes for an
// exchange and per-exchange ordering holds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use super::broadcaster::Broadcaster;
use super::normaliser::Normaliser;
use super::simulator::SimulatorSource;
use super::transport::{FeedTransport, FrameStream};
use super::types::{ConnectorState, ReceiptClock};
use crate::config::{BackoffConfig, ExchangeConfig, SimulatorConfig};
use crate::error::ConnectorError;

/// Exponential reconnect delay with jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial) }
    }

    /// Upper bound for the `attempt`-th retry (1-based): `initial * 2^(attempt-1)`, capped.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let initial_ms = self.initial.as_millis() as u64;
        let ms = initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms).min(self.max)
    }

    /// Drawn uniformly from `[ceiling / 2, ceiling]`.
    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rng.gen_range(ceiling / 2..=ceiling))
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(cfg: &BackoffConfig) -> Self {
        Self::new(Duration::from_millis(cfg.initial_ms), Duration::from_millis(cfg.max_ms))
    }
}

/// Read side of a connector's state, for `/health` and status notices.
#[derive(Debug, Clone)]
pub struct ConnectorHandle {
    exchange: String,
    state: watch::Receiver<ConnectorState>,
}

impl ConnectorHandle {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn status(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Resolves on the next state transition.
    pub async fn changed(&mut self) -> Option<ConnectorState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }
}

pub struct ExchangeConnector {
    exchange: String,
    url: Option<String>,
    subscribe_frames: Vec<String>,
    degrade_after: u32,
    backoff: Backoff,
    read_timeout: Duration,
    connect_timeout: Duration,
    tick: Duration,
    transport: Arc<dyn FeedTransport>,
    normaliser: Arc<Normaliser>,
    broadcaster: Arc<Broadcaster>,
    simulator: SimulatorSource,
    clock: Arc<ReceiptClock>,
    state: watch::Sender<ConnectorState>,
    failures: u32,
    rng: StdRng,
}

impl ExchangeConnector {
    /// `normaliser` must already know `config.id`.
    pub fn new(
        config: &ExchangeConfig,
        simulator: &SimulatorConfig,
        transport: Arc<dyn FeedTransport>,
        normaliser: Arc<Normaliser>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let clock = Arc::new(ReceiptClock::new());
        let symbols = config.canonical_symbols();
        let (state, _) = watch::channel(ConnectorState::Disconnected);

        Self {
            exchange: config.id.clone(),
            url: config.url.clone(),
            subscribe_frames: config.venue.adapter().subscribe_frames(&config.symbols),
            degrade_after: config.degrade_after.max(1),
            backoff: Backoff::from(&config.backoff),
            read_timeout: config.read_timeout(),
            connect_timeout: config.connect_timeout(),
            tick: simulator.tick(),
            transport,
            normaliser,
            broadcaster,
            simulator: SimulatorSource::new(&config.id, &symbols, simulator, clock.clone()),
            clock,
            state,
            failures: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn handle(&self) -> ConnectorHandle {
        ConnectorHandle {
            exchange: self.exchange.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn status(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Runs until `shutdown` flips (or its sender is dropped). Never gives up
    /// on the upstream by itself.
    #[instrument(name = "connector", skip_all, fields(exchange = %self.exchange))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let Some(url) = self.url.clone() else {
            info!("no upstream configured, serving simulated data");
            self.set_state(ConnectorState::Degraded);
            let _ = self
                .drive(std::future::pending::<()>(), &mut ticker, &mut shutdown)
                .await;
            info!("connector stopped");
            return;
        };

        let mut attempt: u32 = 0;
        while !*shutdown.borrow() {
            if self.status() != ConnectorState::Degraded {
                self.set_state(ConnectorState::Connecting);
            }
            counter!("feedgate_connect_attempts_total", "exchange" => self.exchange.clone()).increment(1);

            let transport = self.transport.clone();
            let subscribe = self.subscribe_frames.clone();
            let target = url.clone();
            let limit = self.connect_timeout;
            let connect = async move {
                timeout(limit, transport.connect(&target, &subscribe))
                    .await
                    .unwrap_or(Err(ConnectorError::ConnectTimeout(limit)))
            };

            let error = match self.drive(connect, &mut ticker, &mut shutdown).await {
                None => break,
                Some(Ok(frames)) => {
                    attempt = 0;
                    self.failures = 0;
                    self.set_state(ConnectorState::Connected);
                    match self.stream(frames, &mut shutdown).await {
                        None => break,
                        Some(error) => error,
                    }
                }
                Some(Err(error)) => error,
            };

            attempt = attempt.saturating_add(1);
            self.record_failure(&error);

            let delay = self.backoff.delay(attempt, &mut self.rng);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            if self.drive(sleep(delay), &mut ticker, &mut shutdown).await.is_none() {
                break;
            }
        }
        info!("connector stopped");
    }

    /// Awaits `fut`, ticking the simulator meanwhile if degraded. `None` means
    /// shutdown was requested first.
    async fn drive<F: Future>(
        &mut self,
        fut: F,
        ticker: &mut Interval,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                out = &mut fut => return Some(out),
                _ = ticker.tick(), if self.status() == ConnectorState::Degraded => self.emit_simulated(),
            }
        }
    }

    /// Pumps live frames until the link fails. `None` means shutdown.
    async fn stream(
        &mut self,
        mut frames: FrameStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<ConnectorError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                next = timeout(self.read_timeout, frames.next()) => next,
            };
            match next {
                Err(_) => return Some(ConnectorError::ReadTimeout(self.read_timeout)),
                Ok(None) => return Some(ConnectorError::Closed),
                Ok(Some(Err(error))) => return Some(error),
                Ok(Some(Ok(raw))) => self.handle_frame(&raw),
            }
        }
    }

    fn handle_frame(&mut self, raw: &str) {
        match self.normaliser.normalize(&self.exchange, raw, &self.clock) {
            Ok(events) => {
                for event in &events {
                    self.simulator.observe(event);
                    self.broadcaster.publish(event);
                }
            }
            Err(e) if e.is_benign() => debug!(error = %e, "skipping control frame"),
            Err(e) => {
                counter!("feedgate_normalization_failures_total", "exchange" => self.exchange.clone()).increment(1);
                warn!(error = %e, "dropping malformed upstream frame");
            }
        }
    }

    fn emit_simulated(&mut self) {
        let events = self.simulator.tick();
        trace!(count = events.len(), "simulated tick");
        for event in &events {
            self.broadcaster.publish(event);
        }
    }

    fn record_failure(&mut self, error: &ConnectorError) {
        self.failures = self.failures.saturating_add(1);
        counter!("feedgate_upstream_failures_total", "exchange" => self.exchange.clone()).increment(1);
        warn!(error = %error, failures = self.failures, "upstream failure");

        if self.status() == ConnectorState::Degraded {
            return;
        }
        self.set_state(ConnectorState::Disconnected);
        if self.failures >= self.degrade_after {
            self.set_state(ConnectorState::Degraded);
        }
    }

    fn set_state(&self, next: ConnectorState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(state = %next, "connector state changed");
            self.broadcaster.publish_status(&self.exchange, next);
        }
    }
}
