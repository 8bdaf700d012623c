//! Process bootstrap: env overlay and logging.
//!
//! Effective env priority is explicit env vars > `./.env` >
//! `~/.quackgate/.env`. dotenvy never overwrites a variable that is already
//! set, so loading in that order is enough.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Path to the per-user overlay: `~/.quackgate/.env`.
pub fn quackgate_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quackgate")
        .join(".env")
}

/// Load `./.env` then `~/.quackgate/.env`. Missing files are not an error.
pub fn load_quackgate_env() {
    let _ = dotenvy::dotenv();

    let path = quackgate_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        eprintln!("Warning: failed to load {}: {}", path.display(), e);
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `GATEWAY_LOG_FORMAT=json` selects JSON, anything else plain text.
    pub fn from_env() -> Self {
        match std::env::var("GATEWAY_LOG_FORMAT") {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}
