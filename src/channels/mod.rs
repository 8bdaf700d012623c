//! Inbound channels. The gateway only speaks HTTP.

pub mod web;

pub use web::{GatewayState, start_server};
