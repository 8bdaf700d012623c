use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::config::helpers::optional_env;
use crate::config::upstream::timeout_secs;
use crate::dispatch::Network;
use crate::error::ConfigError;

pub const DEFAULT_DEPLOY_COMMAND: &str = "npx hardhat run {script} --network {network}";

/// External build/deploy toolchain settings.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Toolchain project root. Every relative path below resolves against it.
    pub workdir: PathBuf,
    /// Shell template; `{script}`, `{network}` and `{contract}` are substituted.
    pub command_template: String,
    pub testnet_profile: String,
    pub mainnet_profile: String,
    pub deploy_script: PathBuf,
    pub transfer_script: PathBuf,
    pub contract_path: PathBuf,
    pub timeout: Duration,
}

impl DeployConfig {
    /// Defaults rooted at `workdir`.
    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            command_template: DEFAULT_DEPLOY_COMMAND.to_string(),
            testnet_profile: "bscTestnet".to_string(),
            mainnet_profile: "bscMainnet".to_string(),
            deploy_script: PathBuf::from("scripts/deploy.cjs"),
            transfer_script: PathBuf::from("scripts/fund.cjs"),
            contract_path: PathBuf::from("contracts/GenContract.sol"),
            timeout: Duration::from_secs(600),
        }
    }

    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let workdir = match optional_env("DEPLOY_WORKDIR")? {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().map_err(|e| ConfigError::InvalidValue {
                key: "DEPLOY_WORKDIR".to_string(),
                message: format!("unset and the current directory is unreadable: {e}"),
            })?,
        };
        let defaults = Self::with_workdir(workdir);

        let command_template =
            optional_env("DEPLOY_COMMAND")?.unwrap_or(defaults.command_template);
        if !command_template.contains("{script}") {
            return Err(ConfigError::InvalidValue {
                key: "DEPLOY_COMMAND".to_string(),
                message: "template must reference {script}".to_string(),
            });
        }

        Ok(Self {
            command_template,
            testnet_profile: optional_env("DEPLOY_TESTNET_PROFILE")?
                .unwrap_or(defaults.testnet_profile),
            mainnet_profile: optional_env("DEPLOY_MAINNET_PROFILE")?
                .unwrap_or(defaults.mainnet_profile),
            deploy_script: relative_path_env("DEPLOY_SCRIPT", defaults.deploy_script)?,
            transfer_script: relative_path_env("TRANSFER_SCRIPT", defaults.transfer_script)?,
            contract_path: relative_path_env("DEPLOY_CONTRACT_PATH", defaults.contract_path)?,
            timeout: timeout_secs("DEPLOY_TIMEOUT_SECS", defaults.timeout.as_secs())?,
            workdir: defaults.workdir,
        })
    }

    /// Network-profile selector handed to the toolchain.
    pub fn profile(&self, network: Network) -> &str {
        match network {
            Network::Testnet => &self.testnet_profile,
            Network::Mainnet => &self.mainnet_profile,
        }
    }
}

fn relative_path_env(key: &str, default: PathBuf) -> Result<PathBuf, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(default);
    };
    let path = PathBuf::from(raw);
    if !is_contained_relative(&path) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be a relative path inside DEPLOY_WORKDIR".to_string(),
        });
    }
    Ok(path)
}

fn is_contained_relative(path: &Path) -> bool {
    path.components().count() > 0
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
