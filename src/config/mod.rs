//! Configuration for Quackgate.
//!
//! Everything is read from env vars. `./.env` and `~/.quackgate/.env` are
//! overlaid by [`crate::bootstrap`] before [`Config::from_env`] runs, so the
//! effective priority is: explicit env vars > `./.env` > `~/.quackgate/.env`
//! > defaults.

mod channels;
mod deploy;
pub(crate) mod helpers;
mod policy;
mod upstream;

pub use self::channels::GatewayConfig;
pub use self::deploy::{DEFAULT_DEPLOY_COMMAND, DeployConfig};
pub use self::policy::{DEFAULT_DENYLISTED, PaymentConfig, PolicyConfig};
pub use self::upstream::{
    DEFAULT_CHAINGPT_API_URL, DEFAULT_RPC_MAINNET_URL, DEFAULT_RPC_TESTNET_URL, LlmConfig,
    RpcConfig,
};

use crate::error::ConfigError;

/// Serialises tests that mutate process env.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Main configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub policy: PolicyConfig,
    pub payment: PaymentConfig,
    pub llm: LlmConfig,
    pub rpc: RpcConfig,
    pub deploy: DeployConfig,
}

impl Config {
    /// Resolve every section from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve()?,
            policy: PolicyConfig::resolve()?,
            payment: PaymentConfig::resolve()?,
            llm: LlmConfig::resolve()?,
            rpc: RpcConfig::resolve()?,
            deploy: DeployConfig::resolve()?,
        })
    }

    /// Flattened key/value view for `quackgate config`. Secrets are redacted.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let mut gated: Vec<&str> = self
            .payment
            .gated_actions
            .iter()
            .map(|kind| kind.as_str())
            .collect();
        gated.sort_unstable();
        let mut denylist: Vec<&str> = self.policy.denylist.iter().map(String::as_str).collect();
        denylist.sort_unstable();

        vec![
            ("gateway.host", self.gateway.host.clone()),
            ("gateway.port", self.gateway.port.to_string()),
            (
                "gateway.rate_limit_per_minute",
                self.gateway.rate_limit_per_minute.to_string(),
            ),
            (
                "gateway.allowed_origins",
                self.gateway.allowed_origins.join(","),
            ),
            ("policy.denylist", denylist.join(",")),
            (
                "policy.spend_cap",
                format!("{} {}", self.policy.spend_cap, self.policy.native_unit),
            ),
            (
                "policy.deploy_gas_units",
                self.policy.deploy_gas_units.to_string(),
            ),
            ("payment.gated_actions", gated.join(",")),
            (
                "payment.price",
                format!("{} {}", self.payment.amount, self.payment.currency),
            ),
            (
                "payment.pay_to",
                self.payment.pay_to.clone().unwrap_or_else(|| "-".to_string()),
            ),
            (
                "payment.challenge_ttl_secs",
                self.payment.challenge_ttl.as_secs().to_string(),
            ),
            ("llm.api_key", "[REDACTED]".to_string()),
            ("llm.api_url", self.llm.api_url.clone()),
            ("llm.timeout_secs", self.llm.timeout.as_secs().to_string()),
            ("rpc.testnet_url", self.rpc.testnet_url.clone()),
            ("rpc.mainnet_url", self.rpc.mainnet_url.clone()),
            ("rpc.timeout_secs", self.rpc.timeout.as_secs().to_string()),
            ("deploy.workdir", self.deploy.workdir.display().to_string()),
            ("deploy.command", self.deploy.command_template.clone()),
            ("deploy.testnet_profile", self.deploy.testnet_profile.clone()),
            ("deploy.mainnet_profile", self.deploy.mainnet_profile.clone()),
            (
                "deploy.contract_path",
                self.deploy.contract_path.display().to_string(),
            ),
            (
                "deploy.timeout_secs",
                self.deploy.timeout.as_secs().to_string(),
            ),
        ]
    }
}
