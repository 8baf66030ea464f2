//! The WebSocket Edge: per-client WebSocket endpoint and the HTTP chat
//! enqueue endpoint (`SPEC_FULL.md` §4.E).

pub mod auth_middleware;
pub mod http;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{build_router, serve};
pub use state::{AppState, GatewayState};
