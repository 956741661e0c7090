use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use feedgate::config::{BackoffConfig, ExchangeConfig, SimulatorConfig};
use feedgate::error::ConnectorError;
use feedgate::market_data::adapters::Venue;
use feedgate::market_data::broadcaster::Broadcaster;
use feedgate::market_data::connector::{ConnectorHandle, ExchangeConnector};
use feedgate::market_data::normaliser::Normaliser;
use feedgate::market_data::outbound::OutboundQueue;
use feedgate::market_data::registry::ConnectionId;
use feedgate::market_data::transport::{FeedTransport, FrameStream};
use feedgate::market_data::types::{ConnectorState, ExchangeFilter};

type FrameSender = mpsc::UnboundedSender<Result<String, ConnectorError>>;

enum Script {
    Refuse,
    /// Never completes the handshake.
    Hang,
    /// Connects once `open` fires, then yields whatever is pushed to the sender.
    Gated {
        open: oneshot::Receiver<()>,
        frames: mpsc::UnboundedReceiver<Result<String, ConnectorError>>,
    },
}

/// Plays connect outcomes in order; refuses once the script runs out.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
}

impl ScriptedTransport {
    fn push(&self, step: Script) {
        self.script.lock().push_back(step);
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn connect(&self, _url: &str, _subscribe: &[String]) -> Result<FrameStream, ConnectorError> {
        let step = self.script.lock().pop_front();
        match step {
            None | Some(Script::Refuse) => Err(ConnectorError::Connect("refused".into())),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Gated { open, frames }) => {
                open.await.map_err(|_| ConnectorError::Connect("gate dropped".into()))?;
                let stream = futures::stream::unfold(frames, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(stream.boxed())
            }
        }
    }
}

struct Harness {
    queue: Arc<OutboundQueue>,
    handle: ConnectorHandle,
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

fn start(transport: Arc<ScriptedTransport>) -> Harness {
    start_with(transport, |_| {})
}

fn start_with(transport: Arc<ScriptedTransport>, configure: impl FnOnce(&mut ExchangeConfig)) -> Harness {
    let mut exchange = ExchangeConfig::simulated("binance", Venue::Binance, &["BTCUSDT"]);
    exchange.url = Some("wss://scripted.invalid/ws".into());
    exchange.backoff = BackoffConfig { initial_ms: 5, max_ms: 20 };
    configure(&mut exchange);
    let simulator = SimulatorConfig {
        tick_ms: 10,
        rng_seed: Some(9),
        ..SimulatorConfig::default()
    };

    let mut normaliser = Normaliser::new();
    normaliser.register("binance", Venue::Binance);
    let broadcaster = Arc::new(Broadcaster::new(4096));

    let conn = ConnectionId::generate();
    let queue = broadcaster.attach(conn);
    broadcaster
        .registry()
        .subscribe(conn, &ExchangeFilter::Exchange("binance".into()), &["BTCUSDT"]);

    let connector = ExchangeConnector::new(&exchange, &simulator, transport, Arc::new(normaliser), broadcaster);
    let handle = connector.handle();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(connector.run(shutdown));
    Harness { queue, handle, stop, task }
}

#[derive(Debug)]
enum Frame {
    Status(ConnectorState),
    Event { simulated: bool, price: f64, timestamp: DateTime<Utc> },
}

async fn next(queue: &OutboundQueue) -> Frame {
    let raw = tokio::time::timeout(Duration::from_secs(2), queue.pop())
        .await
        .expect("no frame within 2s")
        .expect("queue closed");
    let json: Value = serde_json::from_str(&raw).unwrap();
    if json["type"] == "exchange_status" {
        return Frame::Status(serde_json::from_value(json["status"].clone()).unwrap());
    }
    Frame::Event {
        simulated: json["simulated"].as_bool().unwrap(),
        price: json["price"].as_f64().unwrap(),
        timestamp: json["timestamp"].as_str().unwrap().parse().unwrap(),
    }
}

fn live_trade(price: &str) -> Result<String, ConnectorError> {
    Ok(format!(r#"{{"e":"trade","s":"BTCUSDT","p":"{price}","q":"0.01"}}"#))
}

#[tokio::test]
async fn degraded_feed_is_simulated_and_recovery_goes_live() {
    let transport = Arc::new(ScriptedTransport::default());
    let (open, gate) = oneshot::channel();
    let (tx, rx): (FrameSender, _) = mpsc::unbounded_channel();
    transport.push(Script::Refuse);
    transport.push(Script::Gated { open: gate, frames: rx });

    let harness = start(transport.clone());
    let mut timestamps = Vec::new();
    let mut states = Vec::new();

    // first connect is refused: the simulator takes over
    let mut simulated = Vec::new();
    while simulated.len() < 5 {
        match next(&harness.queue).await {
            Frame::Status(state) => states.push(state),
            Frame::Event { simulated: sim, timestamp, .. } => {
                assert!(sim, "live event before any connection");
                timestamps.push(timestamp);
                simulated.push(timestamp);
            }
        }
    }
    assert!(states.contains(&ConnectorState::Degraded));
    let max_gap = simulated.windows(2).map(|w| w[1] - w[0]).max().unwrap();
    assert!(max_gap < chrono::Duration::milliseconds(500), "simulator stalled for {max_gap}");

    // upstream comes back
    open.send(()).unwrap();
    for price in ["50100.5", "50101", "50102.25"] {
        tx.send(live_trade(price)).unwrap();
    }

    let mut live_prices = Vec::new();
    let mut saw_connected = false;
    while live_prices.len() < 3 {
        match next(&harness.queue).await {
            Frame::Status(state) => {
                saw_connected |= state == ConnectorState::Connected;
                states.push(state);
            }
            Frame::Event { simulated: sim, price, timestamp } => {
                timestamps.push(timestamp);
                if !live_prices.is_empty() {
                    assert!(!sim, "simulated event after the live feed resumed");
                }
                if !sim {
                    live_prices.push(price);
                }
            }
        }
    }
    assert!(saw_connected);
    assert_eq!(live_prices, vec![50100.5, 50101.0, 50102.25]);

    // upstream drops again: simulation resumes from the last live price
    drop(tx);
    let resumed = loop {
        match next(&harness.queue).await {
            Frame::Status(state) => states.push(state),
            Frame::Event { simulated: true, price, timestamp } => {
                timestamps.push(timestamp);
                break price;
            }
            Frame::Event { timestamp, .. } => timestamps.push(timestamp),
        }
    };
    assert!((resumed - 50102.25).abs() / 50102.25 < 0.01, "resumed at {resumed}");

    assert!(
        timestamps.windows(2).all(|w| w[0] < w[1]),
        "timestamps repeated or went backwards across failover"
    );
    let last_degraded = states.iter().rposition(|s| *s == ConnectorState::Degraded).unwrap();
    let connected = states.iter().position(|s| *s == ConnectorState::Connected).unwrap();
    assert!(last_degraded > connected);

    harness.stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), harness.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_upstream_frames_do_not_drop_the_link() {
    let transport = Arc::new(ScriptedTransport::default());
    let (open, gate) = oneshot::channel();
    let (tx, rx): (FrameSender, _) = mpsc::unbounded_channel();
    transport.push(Script::Gated { open: gate, frames: rx });
    open.send(()).unwrap();

    let harness = start(transport);
    tx.send(Ok(r#"{"result":null,"id":1}"#.into())).unwrap();
    tx.send(Ok("not json".into())).unwrap();
    tx.send(Ok(r#"{"e":"trade","s":"BTCUSDT","q":"1"}"#.into())).unwrap();
    tx.send(live_trade("49999.5")).unwrap();

    let price = loop {
        match next(&harness.queue).await {
            Frame::Status(state) => assert_ne!(state, ConnectorState::Degraded),
            Frame::Event { simulated, price, .. } => {
                assert!(!simulated);
                break price;
            }
        }
    };
    assert_eq!(price, 49999.5);

    harness.stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), harness.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn stalled_handshake_times_out_into_simulation() {
    let transport = Arc::new(ScriptedTransport::default());
    let (open, gate) = oneshot::channel();
    let (tx, rx): (FrameSender, _) = mpsc::unbounded_channel();
    transport.push(Script::Hang);
    transport.push(Script::Hang);
    transport.push(Script::Gated { open: gate, frames: rx });

    let harness = start_with(transport.clone(), |exchange| exchange.connect_timeout_ms = 50);

    let mut simulated = 0;
    while simulated < 3 {
        if let Frame::Event { simulated: sim, .. } = next(&harness.queue).await {
            assert!(sim);
            simulated += 1;
        }
    }
    assert_eq!(harness.handle.status(), ConnectorState::Degraded);

    // both stalled attempts were abandoned and the third one gets through
    open.send(()).unwrap();
    tx.send(live_trade("50010")).unwrap();
    let price = loop {
        if let Frame::Event { simulated: false, price, .. } = next(&harness.queue).await {
            break price;
        }
    };
    assert_eq!(price, 50010.0);
    assert_eq!(harness.handle.status(), ConnectorState::Connected);
    assert!(transport.script.lock().is_empty());

    harness.stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), harness.task).await.unwrap().unwrap();
}

async fn states_until_degraded(queue: &OutboundQueue) -> Vec<ConnectorState> {
    let mut states = Vec::new();
    loop {
        match next(queue).await {
            Frame::Status(state) => {
                states.push(state);
                if state == ConnectorState::Degraded {
                    return states;
                }
            }
            Frame::Event { simulated, .. } => panic!("event (simulated: {simulated}) before degrading"),
        }
    }
}

#[tokio::test]
async fn degrades_only_after_consecutive_failure_threshold() {
    use ConnectorState::{Connected, Connecting, Degraded, Disconnected};

    let transport = Arc::new(ScriptedTransport::default());
    let (open, gate) = oneshot::channel();
    let (tx, rx): (FrameSender, _) = mpsc::unbounded_channel();
    open.send(()).unwrap();
    for _ in 0..3 {
        transport.push(Script::Refuse);
    }
    transport.push(Script::Gated { open: gate, frames: rx });

    let harness = start_with(transport, |exchange| exchange.degrade_after = 3);

    let states = states_until_degraded(&harness.queue).await;
    assert_eq!(
        states,
        vec![Connecting, Disconnected, Connecting, Disconnected, Connecting, Disconnected, Degraded]
    );

    tx.send(live_trade("50000")).unwrap();
    loop {
        match next(&harness.queue).await {
            Frame::Status(state) => assert_eq!(state, Connected),
            Frame::Event { simulated: false, .. } => break,
            Frame::Event { .. } => {}
        }
    }

    // a successful connect resets the count: three more failures are needed
    drop(tx);
    let states = states_until_degraded(&harness.queue).await;
    assert_eq!(states, vec![Disconnected, Connecting, Disconnected, Connecting, Disconnected, Degraded]);

    harness.stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), harness.task).await.unwrap().unwrap();
}
