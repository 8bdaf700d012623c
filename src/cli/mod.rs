//! Command-line interface.
//!
//! ```text
//! quackgate [--log-level info] [serve]
//! quackgate doctor [--strict]
//! quackgate config
//! ```

mod doctor;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::channels::{GatewayState, start_server};
use crate::config::Config;
use crate::deploy::{DeploymentOrchestrator, ShellCommandRunner};
use crate::dispatch::Dispatcher;
use crate::llm::ChainGptClient;
use crate::payment::PaymentGate;
use crate::policy::{PolicyEngine, RpcPriceProbe};

pub use doctor::run_doctor_command;

#[derive(Parser, Debug)]
#[command(name = "quackgate")]
#[command(about = "Policy-gated action gateway for smart-contract workflows", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Default tracing level when RUST_LOG is unset.
    #[arg(long, global = true, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP gateway (default)
    Serve,

    /// Probe upstreams and the deploy toolchain
    Doctor {
        /// Exit non-zero if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Print the resolved configuration with secrets redacted
    Config,
}

/// Wire the production collaborators into a dispatcher.
pub fn build_dispatcher(config: &Config) -> Dispatcher {
    Dispatcher::new(
        PolicyEngine::new(
            config.policy.clone(),
            Arc::new(RpcPriceProbe::new(config.rpc.clone())),
        ),
        PaymentGate::new(config.payment.clone()),
        Arc::new(ChainGptClient::new(config.llm.clone())),
        DeploymentOrchestrator::new(config.deploy.clone(), Arc::new(ShellCommandRunner)),
    )
}

/// Serve until `shutdown` resolves, then drain the server.
pub async fn run_serve(config: Config, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.gateway.host, config.gateway.port
            )
        })?;

    let mut gated: Vec<&str> = config
        .payment
        .gated_actions
        .iter()
        .map(|kind| kind.as_str())
        .collect();
    gated.sort_unstable();
    tracing::info!(
        spend_cap = %config.policy.spend_cap,
        gated = %gated.join(","),
        workdir = %config.deploy.workdir.display(),
        "Starting quackgate"
    );

    let state = Arc::new(GatewayState::new(
        build_dispatcher(&config),
        config.gateway.rate_limit_per_minute,
    ));
    start_server(addr, state.clone(), &config.gateway.allowed_origins)
        .await
        .context("Failed to start gateway")?;

    shutdown.await;
    tracing::info!("Shutdown signal received");
    state.shutdown().await;
    Ok(())
}

/// Print `key = value` lines for the resolved configuration.
pub fn run_config_command(config: &Config) {
    for (key, value) in config.summary() {
        println!("{key} = {value}");
    }
}
