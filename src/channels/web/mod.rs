//! HTTP surface of the gateway.

pub mod server;
pub mod types;

pub use server::{GatewayState, RateLimiter, router, start_server, status_for};
