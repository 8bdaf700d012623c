use crate::config::helpers::{list_env, optional_env, parse_env_or};
use crate::error::ConfigError;

/// HTTP gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Fixed-window cap on `/api/agent` requests per minute. Zero disables it.
    pub rate_limit_per_minute: u64,
    /// Extra CORS origins on top of the localhost defaults.
    pub allowed_origins: Vec<String>,
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let allowed_origins = list_env("GATEWAY_ALLOWED_ORIGINS")?.unwrap_or_default();
        for origin in &allowed_origins {
            if origin.parse::<axum::http::HeaderValue>().is_err() {
                return Err(ConfigError::InvalidValue {
                    key: "GATEWAY_ALLOWED_ORIGINS".to_string(),
                    message: format!("'{origin}' is not a valid origin header value"),
                });
            }
        }

        Ok(Self {
            host: optional_env("GATEWAY_HOST")?.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_env_or("GATEWAY_PORT", 3000, "a valid port number")?,
            rate_limit_per_minute: parse_env_or(
                "GATEWAY_RATE_LIMIT_PER_MINUTE",
                60,
                "a non-negative integer",
            )?,
            allowed_origins,
        })
    }
}
