//! Policy engine: identity admission and deploy spend cap.
//!
//! Both checks are pure apart from the price lookup. The spend cap is
//! recomputed on every deploy attempt and never cached.

pub mod price;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::PolicyConfig;
use crate::dispatch::Network;
use crate::error::{GatewayError, PolicyRule, UpstreamError};

pub use self::price::{GasPriceOracle, RpcPriceProbe};

/// Fresh per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    denial: Option<Denial>,
    capped_cost_estimate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Denial {
    rule: PolicyRule,
    reason: String,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            denial: None,
            capped_cost_estimate: None,
        }
    }

    fn deny(rule: PolicyRule, reason: impl Into<String>) -> Self {
        Self {
            denial: Some(Denial {
                rule,
                reason: reason.into(),
            }),
            capped_cost_estimate: None,
        }
    }

    fn with_estimate(mut self, estimate: Decimal) -> Self {
        self.capped_cost_estimate = Some(estimate);
        self
    }

    pub fn allowed(&self) -> bool {
        self.denial.is_none()
    }

    pub fn rule(&self) -> Option<PolicyRule> {
        self.denial.as_ref().map(|d| d.rule)
    }

    pub fn reason(&self) -> Option<&str> {
        self.denial.as_ref().map(|d| d.reason.as_str())
    }

    pub fn capped_cost_estimate(&self) -> Option<Decimal> {
        self.capped_cost_estimate
    }

    /// Turn a denial into `PolicyViolation`; pass the estimate through otherwise.
    pub fn into_result(self) -> Result<Option<Decimal>, GatewayError> {
        match self.denial {
            None => Ok(self.capped_cost_estimate),
            Some(Denial { rule, reason }) => Err(GatewayError::PolicyViolation {
                rule,
                reason,
                estimated_cost: self.capped_cost_estimate,
            }),
        }
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
    oracle: Arc<dyn GasPriceOracle>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, oracle: Arc<dyn GasPriceOracle>) -> Self {
        Self { config, oracle }
    }

    /// Non-empty identity that is not on the deny-set (case-insensitive).
    pub fn admit_identity(&self, caller_id: Option<&str>) -> PolicyDecision {
        let Some(caller) = caller_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return PolicyDecision::deny(PolicyRule::MissingIdentity, "No authenticated wallet.");
        };
        if self.config.denylist.contains(&caller.to_lowercase()) {
            return PolicyDecision::deny(PolicyRule::Denylisted, "Address Denylisted.");
        }
        PolicyDecision::allow()
    }

    /// Price the fixed deploy gas budget and compare it to the ceiling.
    pub async fn check_spend_cap(&self, network: Network) -> Result<PolicyDecision, UpstreamError> {
        let gas_price_wei = self.oracle.gas_price_wei(network).await?;
        let estimate = self.estimate_cost(gas_price_wei);

        if estimate > self.config.spend_cap {
            tracing::warn!(
                %network,
                %estimate,
                cap = %self.config.spend_cap,
                "Deploy estimate exceeds spend cap"
            );
            return Ok(PolicyDecision::deny(
                PolicyRule::SpendCapExceeded,
                format!(
                    "Spend Cap Exceeded. Cost: {:.4} {}.",
                    estimate, self.config.native_unit
                ),
            )
            .with_estimate(estimate));
        }
        Ok(PolicyDecision::allow().with_estimate(estimate))
    }

    /// `gas_price_wei * deploy_gas_units` in native units (18 decimals).
    /// Anything too large to represent saturates and fails the cap.
    pub fn estimate_cost(&self, gas_price_wei: u128) -> Decimal {
        gas_price_wei
            .checked_mul(u128::from(self.config.deploy_gas_units))
            .and_then(|wei| i128::try_from(wei).ok())
            .and_then(|wei| Decimal::try_from_i128_with_scale(wei, 18).ok())
            .map(|cost| cost.normalize())
            .unwrap_or(Decimal::MAX)
    }
}
