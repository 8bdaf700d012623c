//! Pay-per-call challenge protocol.
//!
//! A gated action that arrives without proof gets a [`PaymentChallenge`] and a
//! `402` instead of running. The caller signs the challenge's canonical message
//! and resubmits the identical request with an `X-PAYMENT` header. Presenting
//! a proof always consumes the referenced challenge, valid or not.

pub mod signature;

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::dispatch::{ActionKind, ActionRequest};
use crate::error::PaymentError;

use self::signature::{encode_hex_lower, keccak256, normalize_wallet_address};

/// Header carrying the payment proof on resubmission.
pub const PAYMENT_HEADER: &str = "x-payment";

/// Server-issued, single-use payment requirement bound to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChallenge {
    pub challenge_id: Uuid,
    pub required_amount: Decimal,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hex keccak-256 fingerprint of the challenged request.
    pub bound_action: String,
    /// Lowercased identity of the caller the challenge was issued to.
    pub caller_id: String,
}

impl PaymentChallenge {
    /// Text the caller signs with `personal_sign`.
    pub fn canonical_message(&self) -> String {
        format!(
            "Quackgate Payment Authorization\nChallenge ID: {}\nAmount: {} {}\nAction: 0x{}\nIssued At: {}",
            self.challenge_id,
            self.required_amount,
            self.currency,
            self.bound_action,
            self.issued_at.to_rfc3339(),
        )
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Body of a `402` response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub amount: Decimal,
    pub currency: String,
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
}

/// Decoded `X-PAYMENT` header.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub challenge_id: String,
    pub signer: String,
    pub signature: String,
}

impl PaymentProof {
    /// Accepts base64 (padded or not) of the JSON object, or the raw JSON.
    pub fn from_header(value: &str) -> Result<Self, PaymentError> {
        let trimmed = value.trim();
        let json = if trimmed.starts_with('{') {
            trimmed.as_bytes().to_vec()
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(trimmed)
                .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed))
                .map_err(|e| PaymentError::MalformedProof(format!("invalid base64: {e}")))?
        };
        serde_json::from_slice(&json)
            .map_err(|e| PaymentError::MalformedProof(format!("invalid proof json: {e}")))
    }

    /// Base64 header value for this proof.
    pub fn to_header(&self) -> String {
        let json = serde_json::json!({
            "challengeId": self.challenge_id,
            "signer": self.signer,
            "signature": self.signature,
        });
        base64::engine::general_purpose::STANDARD.encode(json.to_string())
    }
}

/// Keccak-256 over the canonical JSON of the request.
///
/// `serde_json` maps keep keys sorted, so equal requests hash equally.
pub fn action_fingerprint(request: &ActionRequest) -> String {
    let canonical = serde_json::json!({
        "action": request.kind(),
        "caller": request.caller_id.to_lowercase(),
        "network": request.network,
        "parameters": request.params,
    });
    encode_hex_lower(&keccak256(canonical.to_string().as_bytes()))
}

/// Outstanding challenges keyed by id.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    challenges: Mutex<HashMap<Uuid, PaymentChallenge>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, challenge: PaymentChallenge) {
        let mut challenges = self.challenges.lock().await;
        purge_expired(&mut challenges, Utc::now());
        challenges.insert(challenge.challenge_id, challenge);
    }

    /// Remove and return a challenge. At most one caller ever gets `Some`.
    pub async fn take(&self, challenge_id: &Uuid) -> Option<PaymentChallenge> {
        self.challenges.lock().await.remove(challenge_id)
    }

    pub async fn len(&self) -> usize {
        self.challenges.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(challenges: &mut HashMap<Uuid, PaymentChallenge>, now: DateTime<Utc>) {
    challenges.retain(|_, challenge| !challenge.is_expired_at(now));
}

/// Result of running the payment gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerdict {
    /// Action is not gated.
    NotRequired,
    /// A fresh challenge was issued; the action must not run.
    Required(PaymentRequirement),
    /// Proof verified and the challenge consumed.
    Settled { challenge_id: Uuid },
}

/// Payment gate: issues challenges and settles proofs.
pub struct PaymentGate {
    config: PaymentConfig,
    store: ChallengeStore,
}

impl PaymentGate {
    pub fn new(config: PaymentConfig) -> Self {
        Self {
            config,
            store: ChallengeStore::new(),
        }
    }

    pub fn requires_payment(&self, kind: ActionKind) -> bool {
        self.config.gated_actions.contains(&kind)
    }

    pub fn store(&self) -> &ChallengeStore {
        &self.store
    }

    pub async fn check(
        &self,
        request: &ActionRequest,
        proof_header: Option<&str>,
    ) -> Result<PaymentVerdict, PaymentError> {
        if !self.requires_payment(request.kind()) {
            return Ok(PaymentVerdict::NotRequired);
        }
        match proof_header.map(str::trim).filter(|h| !h.is_empty()) {
            None => Ok(PaymentVerdict::Required(self.issue(request).await)),
            Some(header) => {
                let proof = PaymentProof::from_header(header)?;
                let challenge_id = self.settle(request, &proof).await?;
                Ok(PaymentVerdict::Settled { challenge_id })
            }
        }
    }

    async fn issue(&self, request: &ActionRequest) -> PaymentRequirement {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.challenge_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let challenge = PaymentChallenge {
            challenge_id: Uuid::new_v4(),
            required_amount: self.config.amount,
            currency: self.config.currency.clone(),
            issued_at,
            expires_at: issued_at + ttl,
            bound_action: action_fingerprint(request),
            caller_id: request.caller_id.to_lowercase(),
        };
        let requirement = PaymentRequirement {
            amount: challenge.required_amount,
            currency: challenge.currency.clone(),
            challenge_id: challenge.challenge_id,
            expires_at: challenge.expires_at,
            message: challenge.canonical_message(),
            pay_to: self.config.pay_to.clone(),
        };
        tracing::info!(
            challenge_id = %challenge.challenge_id,
            action = %request.kind(),
            caller = %challenge.caller_id,
            "Issued payment challenge"
        );
        self.store.insert(challenge).await;
        requirement
    }

    async fn settle(
        &self,
        request: &ActionRequest,
        proof: &PaymentProof,
    ) -> Result<Uuid, PaymentError> {
        let challenge_id = Uuid::parse_str(proof.challenge_id.trim()).map_err(|_| {
            PaymentError::MalformedProof("challengeId is not a valid uuid".to_string())
        })?;

        let challenge = self
            .store
            .take(&challenge_id)
            .await
            .ok_or_else(|| PaymentError::UnknownChallenge(challenge_id.to_string()))?;

        if challenge.is_expired_at(Utc::now()) {
            return Err(PaymentError::Expired(challenge_id.to_string()));
        }

        let signer = normalize_wallet_address(&proof.signer).ok_or_else(|| {
            PaymentError::MalformedProof("signer is not a valid address".to_string())
        })?;
        if signer != challenge.caller_id {
            return Err(PaymentError::SignerMismatch);
        }

        let fingerprint = action_fingerprint(request);
        if !bool::from(
            fingerprint
                .as_bytes()
                .ct_eq(challenge.bound_action.as_bytes()),
        ) {
            return Err(PaymentError::ActionMismatch);
        }

        signature::verify_personal_signature(
            &challenge.canonical_message(),
            &proof.signature,
            &signer,
        )
        .map_err(PaymentError::BadSignature)?;

        tracing::info!(
            challenge_id = %challenge_id,
            action = %request.kind(),
            caller = %signer,
            "Payment challenge settled"
        );
        Ok(challenge_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::signature::test_support::{HARDHAT_ADDRESS, personal_sign, signing_key};
    use super::*;
    use crate::dispatch::{ActionParams, Network};

    fn gate_with_ttl(ttl: Duration) -> PaymentGate {
        PaymentGate::new(PaymentConfig {
            challenge_ttl: ttl,
            ..PaymentConfig::default()
        })
    }

    fn research(caller: &str, prompt: &str) -> ActionRequest {
        ActionRequest {
            caller_id: caller.to_string(),
            network: Network::Testnet,
            params: ActionParams::Research {
                prompt: prompt.to_string(),
            },
        }
    }

    fn signed_proof(requirement: &PaymentRequirement) -> String {
        PaymentProof {
            challenge_id: requirement.challenge_id.to_string(),
            signer: HARDHAT_ADDRESS.to_string(),
            signature: personal_sign(&signing_key(), &requirement.message),
        }
        .to_header()
    }

    async fn issue(gate: &PaymentGate, request: &ActionRequest) -> PaymentRequirement {
        match gate.check(request, None).await.expect("issue") {
            PaymentVerdict::Required(requirement) => requirement,
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ungated_actions_skip_the_protocol() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let request = ActionRequest {
            caller_id: HARDHAT_ADDRESS.to_string(),
            network: Network::Testnet,
            params: ActionParams::Audit {
                code: "contract A {}".to_string(),
            },
        };
        assert_eq!(
            gate.check(&request, None).await.unwrap(),
            PaymentVerdict::NotRequired
        );
        assert!(gate.store().is_empty().await);
    }

    #[tokio::test]
    async fn missing_proof_issues_one_challenge() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let request = research(HARDHAT_ADDRESS, "what is a rollup?");

        let requirement = issue(&gate, &request).await;
        assert_eq!(requirement.amount, dec!(0.01));
        assert_eq!(requirement.currency, "USDC");
        assert!(requirement.message.contains(&requirement.challenge_id.to_string()));
        assert!(requirement.message.contains("Amount: 0.01 USDC"));
        assert_eq!(gate.store().len().await, 1);
    }

    #[tokio::test]
    async fn valid_proof_settles_exactly_once() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let request = research(HARDHAT_ADDRESS, "what is a rollup?");
        let requirement = issue(&gate, &request).await;
        let header = signed_proof(&requirement);

        let verdict = gate.check(&request, Some(&header)).await.expect("settles");
        assert_eq!(
            verdict,
            PaymentVerdict::Settled {
                challenge_id: requirement.challenge_id
            }
        );
        assert!(gate.store().is_empty().await);

        let replay = gate.check(&request, Some(&header)).await;
        assert!(matches!(replay, Err(PaymentError::UnknownChallenge(_))));
    }

    #[tokio::test]
    async fn expired_challenge_rejects_valid_signature() {
        let gate = gate_with_ttl(Duration::ZERO);
        let request = research(HARDHAT_ADDRESS, "late");
        let requirement = issue(&gate, &request).await;
        let header = signed_proof(&requirement);

        let err = gate.check(&request, Some(&header)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Expired(_) | PaymentError::UnknownChallenge(_)));
    }

    #[tokio::test]
    async fn proof_for_other_request_is_rejected_and_consumed() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let requirement = issue(&gate, &research(HARDHAT_ADDRESS, "cheap question")).await;
        let header = signed_proof(&requirement);

        let err = gate
            .check(&research(HARDHAT_ADDRESS, "different question"), Some(&header))
            .await
            .unwrap_err();
        assert_eq!(err, PaymentError::ActionMismatch);
        assert!(gate.store().is_empty().await);
    }

    #[tokio::test]
    async fn signer_must_be_the_original_caller() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let caller = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
        let request = research(caller, "who pays?");
        let requirement = issue(&gate, &request).await;

        let err = gate
            .check(&request, Some(&signed_proof(&requirement)))
            .await
            .unwrap_err();
        assert_eq!(err, PaymentError::SignerMismatch);
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let gate = gate_with_ttl(Duration::from_secs(300));
        let request = research(HARDHAT_ADDRESS, "forged");
        let requirement = issue(&gate, &request).await;
        let header = PaymentProof {
            challenge_id: requirement.challenge_id.to_string(),
            signer: HARDHAT_ADDRESS.to_string(),
            signature: personal_sign(&signing_key(), "some other message"),
        }
        .to_header();

        let err = gate.check(&request, Some(&header)).await.unwrap_err();
        assert!(matches!(err, PaymentError::BadSignature(_)));
    }

    #[tokio::test]
    async fn concurrent_resubmission_settles_once() {
        let gate = Arc::new(gate_with_ttl(Duration::from_secs(300)));
        let request = research(HARDHAT_ADDRESS, "race");
        let requirement = issue(&gate, &request).await;
        let header = signed_proof(&requirement);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let request = request.clone();
            let header = header.clone();
            handles.push(tokio::spawn(async move {
                gate.check(&request, Some(&header)).await.is_ok()
            }));
        }

        let mut settled = 0;
        for handle in handles {
            if handle.await.expect("task joins") {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);
    }

    #[test]
    fn proof_header_accepts_base64_and_raw_json() {
        let raw = r#"{"challengeId":"c","signer":"0xabc","signature":"0xdef"}"#;
        let expected = PaymentProof {
            challenge_id: "c".to_string(),
            signer: "0xabc".to_string(),
            signature: "0xdef".to_string(),
        };

        assert_eq!(PaymentProof::from_header(raw).unwrap(), expected);
        let padded = base64::engine::general_purpose::STANDARD.encode(raw);
        assert_eq!(PaymentProof::from_header(&padded).unwrap(), expected);
        let unpadded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(raw);
        assert_eq!(PaymentProof::from_header(&unpadded).unwrap(), expected);
        assert!(matches!(
            PaymentProof::from_header("%%%"),
            Err(PaymentError::MalformedProof(_))
        ));
    }

    #[test]
    fn fingerprint_ignores_caller_case_but_not_parameters() {
        let a = research("0xABC", "prompt");
        let b = research("0xabc", "prompt");
        let c = research("0xabc", "prompt!");
        assert_eq!(action_fingerprint(&a), action_fingerprint(&b));
        assert_ne!(action_fingerprint(&b), action_fingerprint(&c));
    }
}
