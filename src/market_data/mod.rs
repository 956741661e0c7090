// Market data module entrypoint
pub mod adapters;       // venue wire shapes and upstream subscribe frames
pub mod broadcaster;    // fan-out to per-connection outbound queues
pub mod canonical;      // symbol canonicalization
pub mod connector;      // per-exchange reconnect loop + simulator failover
pub mod normaliser;     // raw frames -> canonical MarketEvents
pub mod outbound;       // bounded drop-oldest client queues
pub mod registry;       // who is subscribed to what
pub mod router;         // builds connectors from config
pub mod simulator;      // synthetic events while degraded
pub mod snapshot;       // last-seen event per (exchange, symbol)
pub mod transport;      // upstream websocket seam
pub mod types;          // MarketEvent and friends
