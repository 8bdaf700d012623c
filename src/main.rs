use anyhow::Context;
use clap::Parser;
use tokio::signal;

use quackgate::bootstrap::{LogFormat, init_logging, load_quackgate_env};
use quackgate::cli::{Cli, Command, run_config_command, run_doctor_command, run_serve};
use quackgate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_quackgate_env();

    let cli = Cli::parse();
    init_logging(&cli.log_level, LogFormat::from_env())
        .context("Failed to initialize logging")?;

    match cli.command {
        Some(Command::Doctor { strict }) => run_doctor_command(strict).await,
        Some(Command::Config) => {
            let config = Config::from_env().context("Failed to load configuration")?;
            run_config_command(&config);
            Ok(())
        }
        Some(Command::Serve) | None => {
            let config = Config::from_env().context("Failed to load configuration")?;
            run_serve(config, shutdown_signal()).await
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
