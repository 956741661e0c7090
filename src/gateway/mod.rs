// Client-facing side: HTTP routes, WebSocket sessions, wire messages.
pub mod protocol;
pub mod server;
pub mod ws;

pub use server::{create_router, AppState, Gateway};
