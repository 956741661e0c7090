// Subscription registry.
//
// Sole owner of "which connection wants which (exchange, symbol) pair". Every
// read and write goes through the methods below, each of which holds the
// lock for the whole operation, so a match can never observe a half-applied
// subscribe or unsubscribe. Reads share the lock and never block each other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use tracing::debug;

use super::canonical::{canonicalize, CanonicalSymbol};
use super::types::{ExchangeFilter, MarketEvent};

/// Unique per-process connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub exchange: ExchangeFilter,
    pub symbol: CanonicalSymbol,
}

#[derive(Debug, Default)]
struct SymbolSubscribers {
    any: AHashSet<ConnectionId>,
    exchanges: AHashMap<String, AHashSet<ConnectionId>>,
}

impl SymbolSubscribers {
    fn slot(&mut self, filter: &ExchangeFilter) -> &mut AHashSet<ConnectionId> {
        match filter {
            ExchangeFilter::AnyExchange => &mut self.any,
            ExchangeFilter::Exchange(id) => self.exchanges.entry(id.clone()).or_default(),
        }
    }

    fn release(&mut self, filter: &ExchangeFilter, conn: ConnectionId) {
        match filter {
            ExchangeFilter::AnyExchange => {
                self.any.remove(&conn);
            }
            ExchangeFilter::Exchange(id) => {
                if let Some(set) = self.exchanges.get_mut(id) {
                    set.remove(&conn);
                    if set.is_empty() {
                        self.exchanges.remove(id);
                    }
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.any.is_empty() && self.exchanges.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_conn: AHashMap<ConnectionId, AHashSet<SubscriptionKey>>,
    by_symbol: AHashMap<CanonicalSymbol, SymbolSubscribers>,
}

impl Inner {
    fn insert(&mut self, conn: ConnectionId, key: SubscriptionKey) -> bool {
        if !self.by_conn.entry(conn).or_default().insert(key.clone()) {
            return false;
        }
        self.by_symbol
            .entry(key.symbol)
            .or_default()
            .slot(&key.exchange)
            .insert(conn);
        true
    }

    fn release_index(&mut self, conn: ConnectionId, key: &SubscriptionKey) {
        if let Some(subs) = self.by_symbol.get_mut(key.symbol.as_str()) {
            subs.release(&key.exchange, conn);
            if subs.is_empty() {
                self.by_symbol.remove(key.symbol.as_str());
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `(exchange, symbol)` pairs; symbols are canonicalized first.
    /// Returns how many pairs were new.
    pub fn subscribe<S: AsRef<str>>(&self, conn: ConnectionId, exchange: &ExchangeFilter, symbols: &[S]) -> usize {
        let keys = keys_for(exchange, symbols);
        let mut inner = self.inner.write();
        let added = keys.into_iter().filter(|key| inner.insert(conn, key.clone())).count();
        debug!(conn_id = %conn, %exchange, added, "subscribed");
        added
    }

    /// Removes pairs; returns how many were actually held.
    pub fn unsubscribe<S: AsRef<str>>(&self, conn: ConnectionId, exchange: &ExchangeFilter, symbols: &[S]) -> usize {
        let keys = keys_for(exchange, symbols);
        let mut inner = self.inner.write();
        let mut removed = 0;
        for key in keys {
            let held = inner.by_conn.get_mut(&conn).map(|set| set.remove(&key)).unwrap_or(false);
            if held {
                inner.release_index(conn, &key);
                removed += 1;
            }
        }
        if inner.by_conn.get(&conn).is_some_and(|set| set.is_empty()) {
            inner.by_conn.remove(&conn);
        }
        debug!(conn_id = %conn, %exchange, removed, "unsubscribed");
        removed
    }

    /// Drops everything the connection held. Returns the number of pairs removed.
    pub fn remove(&self, conn: ConnectionId) -> usize {
        let mut inner = self.inner.write();
        let Some(keys) = inner.by_conn.remove(&conn) else {
            return 0;
        };
        for key in &keys {
            inner.release_index(conn, key);
        }
        keys.len()
    }

    /// Connections holding `(event.exchange, event.symbol)` or `(any, event.symbol)`.
    /// A connection holding both appears once.
    pub fn matching_connections(&self, event: &MarketEvent) -> AHashSet<ConnectionId> {
        let inner = self.inner.read();
        let Some(subs) = inner.by_symbol.get(event.symbol.as_str()) else {
            return AHashSet::new();
        };
        let mut matched = subs.any.clone();
        if let Some(exact) = subs.exchanges.get(&event.exchange) {
            matched.extend(exact.iter().copied());
        }
        matched
    }

    /// Connections with any subscription that can receive events from `exchange`.
    pub fn interested_in(&self, exchange: &str) -> AHashSet<ConnectionId> {
        let inner = self.inner.read();
        inner
            .by_conn
            .iter()
            .filter(|(_, keys)| keys.iter().any(|key| key.exchange.matches(exchange)))
            .map(|(conn, _)| *conn)
            .collect()
    }

    pub fn subscriptions_of(&self, conn: ConnectionId) -> Vec<SubscriptionKey> {
        let inner = self.inner.read();
        let mut keys: Vec<_> = inner
            .by_conn
            .get(&conn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().by_conn.len()
    }
}

fn keys_for<S: AsRef<str>>(exchange: &ExchangeFilter, symbols: &[S]) -> Vec<SubscriptionKey> {
    symbols
        .iter()
        .map(|s| canonicalize(s.as_ref()))
        .filter(|symbol| !symbol.is_empty())
        .map(|symbol| SubscriptionKey {
            exchange: exchange.clone(),
            symbol,
        })
        .collect()
}
