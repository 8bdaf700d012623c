use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{first_non_empty_env, optional_env, parse_env_or, validate_http_url};
use crate::dispatch::Network;
use crate::error::ConfigError;

pub const DEFAULT_CHAINGPT_API_URL: &str = "https://api.chaingpt.org/chat/stream";
pub const DEFAULT_RPC_TESTNET_URL: &str = "https://data-seed-prebsc-1-s1.binance.org:8545/";
pub const DEFAULT_RPC_MAINNET_URL: &str = "https://bsc-dataseed.binance.org/";

/// Text-generation service settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub api_url: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let api_key = first_non_empty_env(&["QUACKGATE_CHAINGPT_API_KEY", "CHAINGPT_API_KEY"])?
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "CHAINGPT_API_KEY".to_string(),
                hint: "Set it in the environment or in ~/.quackgate/.env".to_string(),
            })?;

        let api_url = optional_env("CHAINGPT_API_URL")?
            .unwrap_or_else(|| DEFAULT_CHAINGPT_API_URL.to_string());
        validate_http_url("CHAINGPT_API_URL", &api_url)?;

        Ok(Self {
            api_key,
            api_url,
            timeout: timeout_secs("LLM_TIMEOUT_SECS", 60)?,
        })
    }
}

/// JSON-RPC endpoints used by the price probe.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub testnet_url: String,
    pub mainnet_url: String,
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            testnet_url: DEFAULT_RPC_TESTNET_URL.to_string(),
            mainnet_url: DEFAULT_RPC_MAINNET_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RpcConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let testnet_url = optional_env("RPC_TESTNET_URL")?
            .unwrap_or_else(|| DEFAULT_RPC_TESTNET_URL.to_string());
        validate_http_url("RPC_TESTNET_URL", &testnet_url)?;

        let mainnet_url = optional_env("RPC_MAINNET_URL")?
            .unwrap_or_else(|| DEFAULT_RPC_MAINNET_URL.to_string());
        validate_http_url("RPC_MAINNET_URL", &mainnet_url)?;

        Ok(Self {
            testnet_url,
            mainnet_url,
            timeout: timeout_secs("RPC_TIMEOUT_SECS", 10)?,
        })
    }

    pub fn endpoint(&self, network: Network) -> &str {
        match network {
            Network::Testnet => &self.testnet_url,
            Network::Mainnet => &self.mainnet_url,
        }
    }
}

pub(crate) fn timeout_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env_or(key, default, "a positive number of seconds")?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
