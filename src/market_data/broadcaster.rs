// Fan-out of canonical events to every matching connection's outbound queue.
//
// Each event is serialized once and the frame is shared by all recipients.
// Pushing never waits, so a stalled client only ever loses its own oldest
// frames.

use std::sync::Arc;

use ahash::AHashMap;
use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::outbound::{Enqueued, Frame, OutboundQueue};
use super::registry::{ConnectionId, SubscriptionRegistry};
use super::snapshot::MarketSnapshot;
use super::types::{ConnectorState, MarketEvent};
use crate::gateway::protocol::{encode_event, encode_notice, StatusNotice};

pub struct Broadcaster {
    registry: SubscriptionRegistry,
    queues: RwLock<AHashMap<ConnectionId, Arc<OutboundQueue>>>,
    snapshot: MarketSnapshot,
    queue_capacity: usize,
    idle: Notify,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            queues: RwLock::new(AHashMap::new()),
            snapshot: MarketSnapshot::new(),
            queue_capacity,
            idle: Notify::new(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    /// Creates the outbound queue for a new connection.
    pub fn attach(&self, conn: ConnectionId) -> Arc<OutboundQueue> {
        let queue = Arc::new(OutboundQueue::new(self.queue_capacity));
        self.queues.write().insert(conn, queue.clone());
        debug!(conn_id = %conn, "attached outbound queue");
        queue
    }

    /// Deregisters a connection: subscriptions first, then its queue, which is
    /// discarded. Once this returns no publish can enqueue to it.
    pub fn detach(&self, conn: ConnectionId) {
        let removed = self.registry.remove(conn);
        let remaining = {
            let mut queues = self.queues.write();
            if let Some(queue) = queues.remove(&conn) {
                queue.discard();
            }
            queues.len()
        };
        debug!(conn_id = %conn, subscriptions = removed, "detached");
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Delivers one event to every matching connection. Returns the number of
    /// queues it was placed on.
    pub fn publish(&self, event: &MarketEvent) -> usize {
        self.snapshot.record(event);
        counter!("feedgate_events_published_total", "exchange" => event.exchange.clone()).increment(1);

        let matched = self.registry.matching_connections(event);
        if matched.is_empty() {
            return 0;
        }

        let frame = match encode_event(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(exchange = %event.exchange, symbol = %event.symbol, error = %e, "failed to encode event");
                return 0;
            }
        };

        let delivered = self.deliver(matched.into_iter(), &frame);
        trace!(exchange = %event.exchange, symbol = %event.symbol, delivered, "published");
        delivered
    }

    /// Sends an `exchange_status` notice to every connection that can receive
    /// events from `exchange`.
    pub fn publish_status(&self, exchange: &str, state: ConnectorState) -> usize {
        let interested = self.registry.interested_in(exchange);
        if interested.is_empty() {
            return 0;
        }
        match encode_notice(&StatusNotice::new(exchange, state)) {
            Ok(frame) => self.deliver(interested.into_iter(), &frame),
            Err(e) => {
                warn!(%exchange, error = %e, "failed to encode status notice");
                0
            }
        }
    }

    /// Sends an `exchange_status` notice to a single connection.
    pub fn notify_status(&self, conn: ConnectionId, exchange: &str, state: ConnectorState) -> bool {
        match encode_notice(&StatusNotice::new(exchange, state)) {
            Ok(frame) => self.deliver(std::iter::once(conn), &frame) == 1,
            Err(e) => {
                warn!(%exchange, error = %e, "failed to encode status notice");
                false
            }
        }
    }

    /// Closes every queue so write loops drain what they hold and finish.
    pub fn close_all(&self) {
        let queues = self.queues.read();
        for queue in queues.values() {
            queue.close();
        }
        debug!(connections = queues.len(), "closed all outbound queues");
    }

    pub fn connection_count(&self) -> usize {
        self.queues.read().len()
    }

    /// Resolves once every attached connection has detached.
    pub async fn wait_idle(&self) {
        loop {
            // registered before the check so a detach in between is not missed
            let notified = self.idle.notified();
            if self.connection_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn deliver(&self, conns: impl Iterator<Item = ConnectionId>, frame: &Frame) -> usize {
        let queues = self.queues.read();
        let mut delivered = 0;
        for conn in conns {
            let Some(queue) = queues.get(&conn) else {
                continue;
            };
            match queue.push(frame.clone()) {
                Ok(Enqueued::Queued) => delivered += 1,
                Ok(Enqueued::DroppedOldest) => {
                    delivered += 1;
                    counter!("feedgate_frames_dropped_total").increment(1);
                    trace!(conn_id = %conn, "slow consumer, dropped oldest frame");
                }
                Err(_) => {}
            }
        }
        counter!("feedgate_deliveries_total").increment(delivered as u64);
        delivered
    }
}
