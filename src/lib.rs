pub mod config;
pub mod error;
pub mod gateway;
pub mod market_data;
pub mod telemetry;

pub use config::GatewayConfig;
pub use gateway::Gateway;
