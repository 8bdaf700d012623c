//! Action dispatcher.
//!
//! Every request passes identity admission, then resolves to a route in
//! [`ROUTES`]: an ordered list of gates followed by one effect. Gates never
//! have side effects beyond recording a payment challenge, so a request that
//! fails any gate leaves nothing behind.

mod request;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::deploy::DeploymentOrchestrator;
use crate::error::GatewayError;
use crate::llm::{CompletionRequest, TextGenerator, strip_code_fences};
use crate::payment::{PaymentGate, PaymentRequirement, PaymentVerdict};
use crate::policy::PolicyEngine;

pub use self::request::{ActionKind, ActionParams, ActionRequest, AgentRequestBody, Network};

/// Precondition checked before an effect runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Live deploy cost estimate against the policy ceiling.
    SpendCap,
    /// Challenge/proof handshake, for actions configured as gated.
    Payment,
}

/// One dispatch-table entry.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub kind: ActionKind,
    pub gates: &'static [Gate],
}

pub const ROUTES: [Route; 5] = [
    Route {
        kind: ActionKind::Research,
        gates: &[Gate::Payment],
    },
    Route {
        kind: ActionKind::Generate,
        gates: &[Gate::Payment],
    },
    Route {
        kind: ActionKind::Audit,
        gates: &[Gate::Payment],
    },
    Route {
        kind: ActionKind::Deploy,
        gates: &[Gate::SpendCap, Gate::Payment],
    },
    Route {
        kind: ActionKind::Transfer,
        gates: &[Gate::Payment],
    },
];

pub fn route_for(kind: ActionKind) -> Route {
    ROUTES
        .iter()
        .copied()
        .find(|route| route.kind == kind)
        .unwrap_or(Route { kind, gates: &[] })
}

/// Action-specific success payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ActionResult {
    Research {
        result: String,
    },
    Generate {
        code: String,
    },
    Audit {
        report: String,
    },
    Deploy {
        address: String,
        logs: String,
        #[serde(rename = "estimatedCost", skip_serializing_if = "Option::is_none")]
        estimated_cost: Option<Decimal>,
    },
    Transfer {
        #[serde(rename = "txHash")]
        tx_hash: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(ActionResult),
    /// Not an error: the caller must pay and resubmit.
    PaymentRequired(PaymentRequirement),
}

pub struct Dispatcher {
    policy: PolicyEngine,
    payments: PaymentGate,
    generator: Arc<dyn TextGenerator>,
    orchestrator: DeploymentOrchestrator,
}

impl Dispatcher {
    pub fn new(
        policy: PolicyEngine,
        payments: PaymentGate,
        generator: Arc<dyn TextGenerator>,
        orchestrator: DeploymentOrchestrator,
    ) -> Self {
        Self {
            policy,
            payments,
            generator,
            orchestrator,
        }
    }

    pub fn payments(&self) -> &PaymentGate {
        &self.payments
    }

    /// Handle one request end to end. `payment_proof` is the raw `X-PAYMENT`
    /// header value, if any.
    pub async fn dispatch(
        &self,
        body: &AgentRequestBody,
        payment_proof: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        self.policy
            .admit_identity(body.user_address.as_deref())
            .into_result()
            .inspect_err(|err| tracing::warn!(action = ?body.action, "Identity rejected: {}", err))?;
        let caller_id = body
            .user_address
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let kind = body
            .action
            .as_deref()
            .and_then(ActionKind::parse)
            .ok_or_else(|| GatewayError::InvalidAction(body.action.clone().unwrap_or_default()))?;
        let request = ActionRequest::from_body(kind, caller_id, body)?;

        tracing::info!(
            action = %kind,
            network = %request.network,
            caller = %request.caller_id,
            "Dispatching action"
        );

        let mut estimated_cost = None;
        for gate in route_for(kind).gates {
            match gate {
                Gate::SpendCap => {
                    estimated_cost = self
                        .policy
                        .check_spend_cap(request.network)
                        .await?
                        .into_result()?;
                }
                Gate::Payment => match self.payments.check(&request, payment_proof).await? {
                    PaymentVerdict::Required(requirement) => {
                        return Ok(DispatchOutcome::PaymentRequired(requirement));
                    }
                    PaymentVerdict::NotRequired | PaymentVerdict::Settled { .. } => {}
                },
            }
        }

        let result = self.execute(&request, estimated_cost).await?;
        tracing::info!(action = %kind, caller = %request.caller_id, "Action completed");
        Ok(DispatchOutcome::Completed(result))
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        estimated_cost: Option<Decimal>,
    ) -> Result<ActionResult, GatewayError> {
        match &request.params {
            ActionParams::Research { prompt } => {
                let result = self
                    .generator
                    .complete(CompletionRequest::research(prompt, &request.caller_id))
                    .await?;
                Ok(ActionResult::Research { result })
            }
            ActionParams::Generate { prompt } => {
                let text = self
                    .generator
                    .complete(CompletionRequest::generate(prompt, &request.caller_id))
                    .await?;
                Ok(ActionResult::Generate {
                    code: strip_code_fences(&text),
                })
            }
            ActionParams::Audit { code } => {
                let report = self.generator.complete(CompletionRequest::audit(code)).await?;
                Ok(ActionResult::Audit { report })
            }
            ActionParams::Deploy { code } => {
                let deployed = self.orchestrator.deploy(code, request.network).await?;
                Ok(ActionResult::Deploy {
                    address: deployed.address_or_not_found().to_string(),
                    logs: deployed.raw_output,
                    estimated_cost,
                })
            }
            ActionParams::Transfer { to_address, amount } => {
                let transfer = self
                    .orchestrator
                    .transfer(to_address, amount, request.network)
                    .await?;
                Ok(ActionResult::Transfer {
                    tx_hash: transfer.tx_hash_or_not_found().to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;
    use crate::config::{DEFAULT_DENYLISTED, DeployConfig, PaymentConfig, PolicyConfig};
    use crate::deploy::{CommandOutput, CommandRunner, CommandSpec};
    use crate::error::{DeploymentError, PaymentError, PolicyRule, UpstreamError};
    use crate::payment::PaymentProof;
    use crate::payment::signature::test_support::{HARDHAT_ADDRESS, personal_sign, signing_key};
    use crate::policy::GasPriceOracle;

    struct StubPrice {
        wei: u128,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GasPriceOracle for StubPrice {
        async fn gas_price_wei(&self, _network: Network) -> Result<u128, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.wei)
        }
    }

    struct StubGenerator {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
            self.requests.lock().expect("requests lock").push(request);
            Ok(self.reply.clone())
        }
    }

    struct StubRunner {
        stdout: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for StubRunner {
        async fn run(&self, _spec: CommandSpec) -> Result<CommandOutput, DeploymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                stdout: self.stdout.clone(),
                stderr: String::new(),
                combined: self.stdout.clone(),
            })
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        price: Arc<StubPrice>,
        generator: Arc<StubGenerator>,
        runner: Arc<StubRunner>,
        workdir: tempfile::TempDir,
    }

    fn harness(gas_price_wei: u128, gated: &[ActionKind], llm_reply: &str, stdout: &str) -> Harness {
        let workdir = tempfile::tempdir().expect("tempdir");
        let price = Arc::new(StubPrice {
            wei: gas_price_wei,
            calls: AtomicUsize::new(0),
        });
        let generator = Arc::new(StubGenerator {
            reply: llm_reply.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let runner = Arc::new(StubRunner {
            stdout: stdout.to_string(),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            PolicyEngine::new(PolicyConfig::default(), price.clone()),
            PaymentGate::new(PaymentConfig {
                gated_actions: gated.iter().copied().collect::<HashSet<_>>(),
                ..PaymentConfig::default()
            }),
            generator.clone(),
            DeploymentOrchestrator::new(
                DeployConfig::with_workdir(workdir.path()),
                runner.clone(),
            ),
        );
        Harness {
            dispatcher,
            price,
            generator,
            runner,
            workdir,
        }
    }

    /// Upstream that never answers within its timeout.
    struct TimedOut;

    fn timed_out(service: &str) -> UpstreamError {
        UpstreamError::Timeout {
            service: service.to_string(),
            timeout: std::time::Duration::from_secs(15),
        }
    }

    #[async_trait]
    impl GasPriceOracle for TimedOut {
        async fn gas_price_wei(&self, network: Network) -> Result<u128, UpstreamError> {
            Err(timed_out(&format!("rpc-{network}")))
        }
    }

    #[async_trait]
    impl TextGenerator for TimedOut {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, UpstreamError> {
            Err(timed_out("chaingpt"))
        }
    }

    fn body(value: serde_json::Value) -> AgentRequestBody {
        serde_json::from_value(value).expect("valid body")
    }

    fn contract_exists(workdir: &Path) -> bool {
        workdir.join("contracts/GenContract.sol").exists()
    }

    #[test]
    fn every_action_has_a_route() {
        for kind in ActionKind::ALL {
            assert_eq!(route_for(kind).kind, kind);
        }
        assert_eq!(
            route_for(ActionKind::Deploy).gates,
            &[Gate::SpendCap, Gate::Payment]
        );
    }

    #[tokio::test]
    async fn denylisted_caller_is_rejected_for_every_action() {
        let h = harness(1_000_000_000, &[], "text", "deployed to: 0x1111111111111111111111111111111111111111");
        for action in ["research", "generate", "audit", "deploy", "transfer", "bogus"] {
            let err = h
                .dispatcher
                .dispatch(
                    &body(json!({
                        "action": action,
                        "userAddress": DEFAULT_DENYLISTED.to_uppercase().replacen("0X", "0x", 1),
                        "prompt": "p",
                        "code": "c",
                    })),
                    None,
                )
                .await
                .expect_err("denylisted");
            assert!(matches!(
                err,
                GatewayError::PolicyViolation {
                    rule: PolicyRule::Denylisted,
                    ..
                }
            ));
        }
        assert_eq!(h.price.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.runner.calls.load(Ordering::SeqCst), 0);
        assert!(h.generator.requests.lock().unwrap().is_empty());
        assert!(!contract_exists(h.workdir.path()));
    }

    #[tokio::test]
    async fn missing_identity_precedes_action_validation() {
        let h = harness(1, &[], "text", "");
        let err = h
            .dispatcher
            .dispatch(&body(json!({ "action": "bogus" })), None)
            .await
            .expect_err("no wallet");
        assert!(matches!(
            err,
            GatewayError::PolicyViolation {
                rule: PolicyRule::MissingIdentity,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unknown_action_is_invalid() {
        let h = harness(1, &[], "text", "");
        let err = h
            .dispatcher
            .dispatch(&body(json!({ "action": "mint", "userAddress": "0xabc" })), None)
            .await
            .expect_err("invalid action");
        assert!(matches!(err, GatewayError::InvalidAction(ref a) if a == "mint"));
    }

    #[tokio::test]
    async fn spend_cap_blocks_deploy_before_orchestrator() {
        // 30 gwei * 3M gas = 0.09 BNB > 0.05
        let h = harness(30_000_000_000, &[], "text", "deployed to: 0x1111111111111111111111111111111111111111");
        let err = h
            .dispatcher
            .dispatch(
                &body(json!({ "action": "deploy", "userAddress": "0xabc", "code": "contract A {}" })),
                None,
            )
            .await
            .expect_err("over cap");
        match err {
            GatewayError::PolicyViolation {
                rule: PolicyRule::SpendCapExceeded,
                estimated_cost,
                ..
            } => assert_eq!(estimated_cost, Some(dec!(0.09))),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.runner.calls.load(Ordering::SeqCst), 0);
        assert!(!contract_exists(h.workdir.path()));
    }

    #[tokio::test]
    async fn upstream_timeouts_surface_as_upstream_timeout() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(StubRunner {
            stdout: String::new(),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            PolicyEngine::new(PolicyConfig::default(), Arc::new(TimedOut)),
            PaymentGate::new(PaymentConfig {
                gated_actions: HashSet::new(),
                ..PaymentConfig::default()
            }),
            Arc::new(TimedOut),
            DeploymentOrchestrator::new(DeployConfig::with_workdir(workdir.path()), runner.clone()),
        );

        let err = dispatcher
            .dispatch(
                &body(json!({ "action": "audit", "userAddress": "0xabc", "code": "contract A {}" })),
                None,
            )
            .await
            .expect_err("generator timed out");
        assert!(matches!(err, GatewayError::UpstreamTimeout { ref service, .. } if service == "chaingpt"));
        assert!(err.to_runtime_error_payload().retryable);

        let err = dispatcher
            .dispatch(
                &body(json!({
                    "action": "deploy",
                    "userAddress": "0xabc",
                    "code": "contract A {}",
                    "network": "mainnet",
                })),
                None,
            )
            .await
            .expect_err("price lookup timed out");
        assert!(matches!(err, GatewayError::UpstreamTimeout { ref service, .. } if service == "rpc-mainnet"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(!contract_exists(workdir.path()));
    }

    #[tokio::test]
    async fn deploy_under_cap_invokes_orchestrator_once() {
        // 3.333 gwei * 3M gas = 0.009999 BNB
        let h = harness(
            3_333_000_000,
            &[],
            "text",
            "Contract deployed to: 0x1111111111111111111111111111111111111111\n",
        );
        let outcome = h
            .dispatcher
            .dispatch(
                &body(json!({
                    "action": "deploy",
                    "userAddress": "0xAuthorized",
                    "network": "testnet",
                    "code": "contract GenContract {}",
                })),
                None,
            )
            .await
            .expect("deploy succeeds");

        assert_eq!(
            outcome,
            DispatchOutcome::Completed(ActionResult::Deploy {
                address: "0x1111111111111111111111111111111111111111".to_string(),
                logs: "Contract deployed to: 0x1111111111111111111111111111111111111111\n"
                    .to_string(),
                estimated_cost: Some(dec!(0.009999)),
            })
        );
        assert_eq!(h.runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.price.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generate_strips_fences() {
        let h = harness(1, &[], "```solidity\ncontract GenContract {}\n```", "");
        let outcome = h
            .dispatcher
            .dispatch(
                &body(json!({ "action": "generate", "userAddress": "0xabc", "prompt": "token" })),
                None,
            )
            .await
            .expect("generate");
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(ActionResult::Generate {
                code: "contract GenContract {}".to_string()
            })
        );
    }

    #[tokio::test]
    async fn invalid_transfer_fails_before_any_gate() {
        let h = harness(1, &[ActionKind::Transfer], "text", "");
        let err = h
            .dispatcher
            .dispatch(
                &body(json!({
                    "action": "transfer",
                    "userAddress": "0xabc",
                    "toAddress": "0xnope",
                    "amount": "1",
                })),
                None,
            )
            .await
            .expect_err("bad recipient");
        assert!(matches!(err, GatewayError::InvalidInput { field: "toAddress", .. }));
        assert!(h.dispatcher.payments().store().is_empty().await);
    }

    #[tokio::test]
    async fn gated_action_requires_payment_then_runs_once() {
        let h = harness(1, &[ActionKind::Research], "answer", "");
        let request = body(json!({
            "action": "research",
            "userAddress": HARDHAT_ADDRESS,
            "prompt": "what is a validator?",
        }));

        let requirement = match h.dispatcher.dispatch(&request, None).await.expect("402") {
            DispatchOutcome::PaymentRequired(requirement) => requirement,
            other => panic!("expected payment challenge, got {other:?}"),
        };
        assert!(h.generator.requests.lock().unwrap().is_empty());

        let proof = PaymentProof {
            challenge_id: requirement.challenge_id.to_string(),
            signer: HARDHAT_ADDRESS.to_string(),
            signature: personal_sign(&signing_key(), &requirement.message),
        }
        .to_header();

        let outcome = h
            .dispatcher
            .dispatch(&request, Some(&proof))
            .await
            .expect("paid request runs");
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(ActionResult::Research {
                result: "answer".to_string()
            })
        );
        assert_eq!(h.generator.requests.lock().unwrap().len(), 1);

        let replay = h.dispatcher.dispatch(&request, Some(&proof)).await;
        assert!(matches!(
            replay,
            Err(GatewayError::PaymentInvalid(PaymentError::UnknownChallenge(_)))
        ));
        assert_eq!(h.generator.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gated_deploy_rechecks_spend_cap_on_resubmission() {
        let h = harness(
            1_000_000_000,
            &[ActionKind::Deploy],
            "text",
            "deployed to: 0x1111111111111111111111111111111111111111",
        );
        let request = body(json!({
            "action": "deploy",
            "userAddress": HARDHAT_ADDRESS,
            "code": "contract A {}",
        }));

        let requirement = match h.dispatcher.dispatch(&request, None).await.expect("402") {
            DispatchOutcome::PaymentRequired(requirement) => requirement,
            other => panic!("expected payment challenge, got {other:?}"),
        };
        let proof = PaymentProof {
            challenge_id: requirement.challenge_id.to_string(),
            signer: HARDHAT_ADDRESS.to_string(),
            signature: personal_sign(&signing_key(), &requirement.message),
        }
        .to_header();
        h.dispatcher
            .dispatch(&request, Some(&proof))
            .await
            .expect("paid deploy");

        assert_eq!(h.price.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.runner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn results_serialize_with_wire_names() {
        let transfer = serde_json::to_value(ActionResult::Transfer {
            tx_hash: "hash not found".to_string(),
        })
        .unwrap();
        assert_eq!(transfer, json!({ "txHash": "hash not found" }));

        let deploy = serde_json::to_value(ActionResult::Deploy {
            address: "address not found".to_string(),
            logs: String::new(),
            estimated_cost: None,
        })
        .unwrap();
        assert_eq!(deploy, json!({ "address": "address not found", "logs": "" }));
    }
}
