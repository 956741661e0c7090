use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use feedgate::error::GatewayError;
use feedgate::gateway::AppState;
use feedgate::{Gateway, GatewayConfig};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), GatewayError>>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = GatewayConfig::default();
        config.simulate_only();
        config.simulator.tick_ms = 20;
        config.simulator.rng_seed = Some(42);
        config.server.status_interval_secs = 0;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let gateway = Gateway::new(config);
        let state = gateway.state().clone();
        let task = tokio::spawn(gateway.serve(listener, async move {
            let _ = stopped.await;
        }));
        Self { addr, state, stop: Some(stop), task }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn client(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        ws
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("gateway did not shut down")
            .unwrap()
            .unwrap();
    }
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

fn is_event(frame: &Value, exchange: &str, symbol: &str) -> bool {
    frame["exchange"] == exchange && frame["symbol"] == symbol && frame.get("price").is_some()
}

#[tokio::test]
async fn banner_and_health() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let banner: Value = http.get(server.url("/")).send().await.unwrap().json().await.unwrap();
    assert_eq!(banner["service"], "feedgate");

    let mut health = Value::Null;
    for _ in 0..50 {
        health = http.get(server.url("/health")).send().await.unwrap().json().await.unwrap();
        if health["connectors"]["kraken"] == "degraded" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(health["status"], "degraded");
    for exchange in ["binance", "coinbase", "kraken"] {
        assert_eq!(health["connectors"][exchange], "degraded");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn market_data_snapshot_is_sorted_and_simulated() {
    let server = TestServer::start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let body: Value = reqwest::get(server.url("/api/market_data")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["exchanges"], serde_json::json!(["binance", "coinbase", "kraken"]));

    let data = body["data"].as_array().unwrap();
    assert!(!data.is_empty());
    let keys: Vec<(String, String)> = data
        .iter()
        .map(|e| (e["exchange"].as_str().unwrap().to_string(), e["symbol"].as_str().unwrap().to_string()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert!(data.iter().all(|e| e["simulated"] == true && e["price"].as_f64().unwrap() > 0.0));
    assert!(body["symbols"].as_array().unwrap().iter().any(|s| s == "BTCUSD"));

    server.shutdown().await;
}

#[tokio::test]
async fn subscribe_receives_matching_events() {
    let server = TestServer::start().await;
    let mut ws = server.client().await;

    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["BTCUSDT"],"exchange":"binance"})).await;

    let mut got_status = false;
    let mut got_event = false;
    for _ in 0..50 {
        let frame = next_json(&mut ws).await;
        if frame["type"] == "exchange_status" {
            assert_eq!(frame["exchange"], "binance");
            got_status |= frame["status"] == "degraded";
        } else {
            assert!(is_event(&frame, "binance", "BTCUSDT"), "unexpected frame {frame}");
            assert_eq!(frame["type"], "trade");
            assert_eq!(frame["simulated"], true);
            got_event = true;
        }
        if got_status && got_event {
            break;
        }
    }
    assert!(got_status && got_event);

    server.shutdown().await;
}

#[tokio::test]
async fn any_exchange_matches_across_venue_spellings() {
    let server = TestServer::start().await;
    let mut ws = server.client().await;

    // Coinbase and Kraken both publish BTC/USD under one canonical key
    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["btc-usd"]})).await;

    let mut exchanges = std::collections::BTreeSet::new();
    for _ in 0..100 {
        let frame = next_json(&mut ws).await;
        if frame["type"] == "exchange_status" {
            continue;
        }
        assert_eq!(frame["symbol"], "BTCUSD");
        exchanges.insert(frame["exchange"].as_str().unwrap().to_string());
        if exchanges.len() == 2 {
            break;
        }
    }
    assert_eq!(exchanges.into_iter().collect::<Vec<_>>(), vec!["coinbase", "kraken"]);

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_keep_connection_open() {
    let server = TestServer::start().await;
    let mut ws = server.client().await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Binary(vec![0xff, 0x00, 0x13])).await.unwrap();
    send_json(&mut ws, serde_json::json!({"action":"test","data":"hello"})).await;
    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["ETHUSDT"],"exchange":"binance"})).await;

    let mut received = false;
    for _ in 0..20 {
        let frame = next_json(&mut ws).await;
        if is_event(&frame, "binance", "ETHUSDT") {
            received = true;
            break;
        }
    }
    assert!(received, "connection stopped responding after malformed input");

    server.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_stops_only_that_pair() {
    let server = TestServer::start().await;
    let mut ws = server.client().await;

    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["BTCUSDT","ETHUSDT"],"exchange":"binance"})).await;
    let (mut seen_status, mut seen_btc) = (false, false);
    while !(seen_status && seen_btc) {
        let frame = next_json(&mut ws).await;
        seen_status |= frame["type"] == "exchange_status";
        seen_btc |= is_event(&frame, "binance", "BTCUSDT");
    }

    send_json(&mut ws, serde_json::json!({"action":"unsubscribe","symbols":["BTC/USDT"],"exchange":"binance"})).await;
    // the status notice for this subscribe is queued after the unsubscribe took effect
    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["SOLUSDT"],"exchange":"binance"})).await;
    loop {
        if next_json(&mut ws).await["type"] == "exchange_status" {
            break;
        }
    }

    let mut eth = 0;
    let mut sol = 0;
    for _ in 0..40 {
        let frame = next_json(&mut ws).await;
        assert_ne!(frame["symbol"], "BTCUSDT", "received BTCUSDT after unsubscribing");
        if frame["symbol"] == "ETHUSDT" {
            eth += 1;
        }
        if frame["symbol"] == "SOLUSDT" {
            sol += 1;
        }
    }
    assert!(eth > 0 && sol > 0);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_client_sessions() {
    let server = TestServer::start().await;
    let mut ws = server.client().await;
    send_json(&mut ws, serde_json::json!({"action":"subscribe","symbols":["ADAUSDT"]})).await;
    next_json(&mut ws).await;
    let state = server.state.clone();
    assert_eq!(state.broadcaster.connection_count(), 1);

    server.shutdown().await;
    // serve only returns after the session drained and detached
    assert_eq!(state.broadcaster.connection_count(), 0);

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
        true
    })
    .await
    .unwrap_or(false);
    assert!(closed);
}
