//! Deployment orchestrator.
//!
//! Stages generated source into the toolchain project, runs the deploy or
//! transfer script against a network profile, and reads the address or
//! transaction hash back from the script's output. The toolchain is a black
//! box; this module only reports what it printed.

pub mod output;
pub mod runner;
pub mod script;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::config::DeployConfig;
use crate::dispatch::Network;
use crate::error::DeploymentError;

pub use self::output::{ADDRESS_NOT_FOUND, HASH_NOT_FOUND};
pub use self::runner::{CommandOutput, CommandRunner, CommandSpec, CommandVar, ShellCommandRunner};

/// Outcome of one deploy run. `address` is `None` when the run exited cleanly
/// but printed no recognizable address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub success: bool,
    pub address: Option<String>,
    pub raw_output: String,
}

impl DeploymentResult {
    pub fn address_or_not_found(&self) -> &str {
        self.address.as_deref().unwrap_or(ADDRESS_NOT_FOUND)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub raw_output: String,
}

impl TransferResult {
    pub fn tx_hash_or_not_found(&self) -> &str {
        self.tx_hash.as_deref().unwrap_or(HASH_NOT_FOUND)
    }
}

/// Runs deploys and transfers through the external toolchain.
///
/// The toolchain compiles the staged contract (or loads the transfer script)
/// while it runs, not at spawn, so each slot stays locked until the run
/// finishes. Deploys therefore queue behind one another for up to the
/// command timeout, and so do transfers. The two slots are independent.
pub struct DeploymentOrchestrator {
    config: DeployConfig,
    runner: Arc<dyn CommandRunner>,
    /// Held across stage + run: the contract file is a single slot.
    deploy_slot: Mutex<()>,
    /// Same for the generated transfer script.
    transfer_slot: Mutex<()>,
}

impl DeploymentOrchestrator {
    pub fn new(config: DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            deploy_slot: Mutex::new(()),
            transfer_slot: Mutex::new(()),
        }
    }

    /// Write `source` to the contract slot and run the deploy script.
    pub async fn deploy(
        &self,
        source: &str,
        network: Network,
    ) -> Result<DeploymentResult, DeploymentError> {
        let _slot = self.deploy_slot.lock().await;
        let contract = self.stage(&self.config.contract_path, source).await?;

        let output = self
            .runner
            .run(self.command_spec("deploy", &self.config.deploy_script, network, &contract))
            .await?;

        let address = output::extract_deployed_address(&output.stdout)
            .or_else(|| output::extract_deployed_address(&output.combined));
        if address.is_none() {
            tracing::warn!(%network, "Deploy finished but printed no contract address");
        }
        Ok(DeploymentResult {
            success: true,
            address,
            raw_output: output.combined,
        })
    }

    /// Render the transfer script for this recipient/amount and run it.
    pub async fn transfer(
        &self,
        to_address: &str,
        amount: &Decimal,
        network: Network,
    ) -> Result<TransferResult, DeploymentError> {
        let _slot = self.transfer_slot.lock().await;
        self.stage(
            &self.config.transfer_script,
            &script::render_transfer_script(to_address, amount),
        )
        .await?;

        let contract = self.config.workdir.join(&self.config.contract_path);
        let output = self
            .runner
            .run(self.command_spec("transfer", &self.config.transfer_script, network, &contract))
            .await?;

        let tx_hash = output::extract_tx_hash(&output.stdout)
            .or_else(|| output::extract_tx_hash(&output.combined));
        if tx_hash.is_none() {
            tracing::warn!(%network, "Transfer finished but printed no transaction hash");
        }
        Ok(TransferResult {
            success: true,
            tx_hash,
            raw_output: output.combined,
        })
    }

    /// Overwrite `relative` under the workdir, creating parents as needed.
    async fn stage(&self, relative: &Path, contents: &str) -> Result<PathBuf, DeploymentError> {
        let path = self.config.workdir.join(relative);
        let staging_error = |e: std::io::Error| DeploymentError::Staging {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(staging_error)?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(staging_error)?;
        tracing::debug!(path = %path.display(), bytes = contents.len(), "Staged toolchain input");
        Ok(path)
    }

    fn command_spec(
        &self,
        label: &'static str,
        script: &Path,
        network: Network,
        contract: &Path,
    ) -> CommandSpec {
        CommandSpec {
            label,
            template: self.config.command_template.clone(),
            workdir: self.config.workdir.clone(),
            vars: vec![
                CommandVar {
                    placeholder: "{script}",
                    env_key: "QUACKGATE_SCRIPT",
                    value: script.display().to_string(),
                },
                CommandVar {
                    placeholder: "{network}",
                    env_key: "QUACKGATE_NETWORK",
                    value: self.config.profile(network).to_string(),
                },
                CommandVar {
                    placeholder: "{contract}",
                    env_key: "QUACKGATE_CONTRACT_PATH",
                    value: contract.display().to_string(),
                },
            ],
            timeout: self.config.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    /// Records every spec and replies with a canned result.
    struct ScriptedRunner {
        reply: Result<CommandOutput, fn() -> DeploymentError>,
        calls: StdMutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn printing(stdout: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    combined: stdout.to_string(),
                }),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> DeploymentError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeploymentError> {
            self.calls.lock().expect("calls lock").push(spec);
            match &self.reply {
                Ok(output) => Ok(output.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    /// Echoes whatever contract is staged once the "compile" step starts.
    struct EchoStaged;

    #[async_trait]
    impl CommandRunner for EchoStaged {
        async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeploymentError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let staged = tokio::fs::read_to_string(spec.workdir.join("contracts/GenContract.sol"))
                .await
                .map_err(|e| DeploymentError::Spawn(e.to_string()))?;
            Ok(CommandOutput {
                stdout: staged.clone(),
                stderr: String::new(),
                combined: staged,
            })
        }
    }

    fn orchestrator(dir: &Path, runner: Arc<ScriptedRunner>) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(DeployConfig::with_workdir(dir), runner)
    }

    #[tokio::test]
    async fn concurrent_deploys_each_compile_their_own_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator =
            DeploymentOrchestrator::new(DeployConfig::with_workdir(dir.path()), Arc::new(EchoStaged));

        let (first, second) = tokio::join!(
            orchestrator.deploy("contract First {}", Network::Testnet),
            orchestrator.deploy("contract Second {}", Network::Testnet),
        );
        assert_eq!(first.expect("first deploy").raw_output, "contract First {}");
        assert_eq!(second.expect("second deploy").raw_output, "contract Second {}");
    }

    #[tokio::test]
    async fn deploy_stages_source_and_reads_address() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::printing(
            "Compiled 1 Solidity file\nContract deployed to: 0x1111111111111111111111111111111111111111\n",
        );
        let orchestrator = orchestrator(dir.path(), runner.clone());

        let result = orchestrator
            .deploy("contract GenContract {}", Network::Testnet)
            .await
            .expect("deploy");

        assert!(result.success);
        assert_eq!(
            result.address.as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        let staged = std::fs::read_to_string(dir.path().join("contracts/GenContract.sol"))
            .expect("staged contract");
        assert_eq!(staged, "contract GenContract {}");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].label, "deploy");
        let network = calls[0]
            .vars
            .iter()
            .find(|var| var.placeholder == "{network}")
            .expect("network var");
        assert_eq!(network.value, "bscTestnet");
    }

    #[tokio::test]
    async fn deploy_overwrites_previous_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(dir.path(), ScriptedRunner::printing("ok\n"));

        orchestrator
            .deploy("contract First {}", Network::Mainnet)
            .await
            .expect("first deploy");
        orchestrator
            .deploy("contract Second {}", Network::Mainnet)
            .await
            .expect("second deploy");

        let staged = std::fs::read_to_string(dir.path().join("contracts/GenContract.sol"))
            .expect("staged contract");
        assert_eq!(staged, "contract Second {}");
    }

    #[tokio::test]
    async fn missing_address_is_degraded_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(dir.path(), ScriptedRunner::printing("Nothing to see\n"));

        let result = orchestrator
            .deploy("contract A {}", Network::Testnet)
            .await
            .expect("deploy");
        assert!(result.success);
        assert_eq!(result.address, None);
        assert_eq!(result.address_or_not_found(), ADDRESS_NOT_FOUND);
        assert_eq!(result.raw_output, "Nothing to see\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_deployment_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(
            dir.path(),
            ScriptedRunner::failing(|| DeploymentError::NonZeroExit {
                status: "exit status: 1".to_string(),
                output: "HH700: Artifact not found\n".to_string(),
            }),
        );

        let err = orchestrator
            .deploy("contract A {}", Network::Testnet)
            .await
            .expect_err("deploy fails");
        assert_eq!(err.raw_output(), Some("HH700: Artifact not found\n"));
    }

    #[tokio::test]
    async fn transfer_writes_script_and_reads_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hash = format!("0x{}", "cd".repeat(32));
        let runner = ScriptedRunner::printing(&format!(
            "Sender: 0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266\nWaiting for blocks...\nTxHash: {hash}\n"
        ));
        let orchestrator = orchestrator(dir.path(), runner.clone());

        let result = orchestrator
            .transfer(
                "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
                &dec!(0.5),
                Network::Mainnet,
            )
            .await
            .expect("transfer");
        assert_eq!(result.tx_hash.as_deref(), Some(hash.as_str()));

        let script = std::fs::read_to_string(dir.path().join("scripts/fund.cjs"))
            .expect("transfer script");
        assert!(script.contains("0x70997970c51812dc3a010c7d01b50e0d17dc79c8"));
        assert!(script.contains(r#"parseEther("0.5")"#));

        let calls = runner.calls();
        assert_eq!(calls[0].label, "transfer");
        assert!(
            calls[0]
                .vars
                .iter()
                .any(|var| var.placeholder == "{network}" && var.value == "bscMainnet")
        );
    }

    #[tokio::test]
    async fn transfer_without_hash_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(dir.path(), ScriptedRunner::printing("Sender: 0xabc\n"));

        let result = orchestrator
            .transfer(
                "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
                &dec!(1),
                Network::Testnet,
            )
            .await
            .expect("transfer");
        assert_eq!(result.tx_hash_or_not_found(), HASH_NOT_FOUND);
    }

    #[tokio::test]
    async fn real_shell_runner_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = DeployConfig::with_workdir(dir.path());
        config.command_template =
            "test -f {contract} && echo \"GenContract deployed to: 0x2222222222222222222222222222222222222222\"".to_string();
        config.timeout = Duration::from_secs(10);
        let orchestrator = DeploymentOrchestrator::new(config, Arc::new(ShellCommandRunner));

        let result = orchestrator
            .deploy("contract A {}", Network::Testnet)
            .await
            .expect("deploy");
        assert_eq!(
            result.address.as_deref(),
            Some("0x2222222222222222222222222222222222222222")
        );
    }
}
