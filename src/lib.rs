//! Quackgate: a policy-gated action gateway.
//!
//! A single HTTP endpoint accepts `research`, `generate`, `audit`, `deploy`
//! and `transfer` requests. Each request is admitted by the policy engine,
//! optionally held behind a pay-per-call challenge, and only then executed
//! against the text-generation service or the deploy toolchain.

pub mod bootstrap;
pub mod channels;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod payment;
pub mod policy;

pub use config::Config;
pub use error::GatewayError;
