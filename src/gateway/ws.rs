// WebSocket sessions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use metrics::gauge;
use tracing::{debug, info};

use super::protocol::ClientCommand;
use super::server::AppState;
use crate::market_data::registry::ConnectionId;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One reader and one writer per client. Whichever ends first tears the
/// session down; deregistration happens before the writer is stopped.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn = ConnectionId::generate();
    let queue = state.broadcaster.attach(conn);
    gauge!("feedgate_ws_connections").increment(1.0);
    info!(conn_id = %conn, "client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn({
        let queue = queue.clone();
        async move {
            while let Some(frame) = queue.pop().await {
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    queue.discard();
                    return;
                }
            }
            // queue closed for shutdown and fully drained
            let _ = sender.send(Message::Close(None)).await;
        }
    });

    let mut recv_task = tokio::spawn({
        let state = state.clone();
        async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => apply_command(&state, conn, &text),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => apply_command(&state, conn, text),
                        Err(_) => debug!(conn_id = %conn, len = bytes.len(), "ignoring non-utf8 binary frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(conn_id = %conn, error = %e, "client read failed");
                        break;
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            state.broadcaster.detach(conn);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            state.broadcaster.detach(conn);
            send_task.abort();
        }
    }

    gauge!("feedgate_ws_connections").decrement(1.0);
    info!(conn_id = %conn, "client disconnected");
}

/// Malformed or unknown commands are ignored; the session stays open.
pub fn apply_command(state: &AppState, conn: ConnectionId, text: &str) {
    let command = match ClientCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(conn_id = %conn, error = %e, "ignoring unparseable client frame");
            return;
        }
    };

    let filter = command.exchange_filter();
    let registry = state.broadcaster.registry();
    match &command {
        ClientCommand::Subscribe { symbols, .. } => {
            let added = registry.subscribe(conn, &filter, symbols);
            info!(conn_id = %conn, exchange = %filter, ?symbols, added, "subscribe");
            if symbols.is_empty() {
                return;
            }
            for handle in state.connectors.iter().filter(|h| filter.matches(h.exchange())) {
                state.broadcaster.notify_status(conn, handle.exchange(), handle.status());
            }
        }
        ClientCommand::Unsubscribe { symbols, .. } => {
            let removed = registry.unsubscribe(conn, &filter, symbols);
            info!(conn_id = %conn, exchange = %filter, ?symbols, removed, "unsubscribe");
        }
    }
}
