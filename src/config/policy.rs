use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::helpers::{list_env, optional_env, parse_env_or};
use crate::dispatch::ActionKind;
use crate::error::ConfigError;
use crate::payment::signature::normalize_wallet_address;

/// Identity that is always refused unless `POLICY_DENYLIST` overrides the list.
pub const DEFAULT_DENYLISTED: &str = "0xdead00000000000000000000000000000000beef";

/// Policy engine limits.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Lowercased caller identities refused on every action.
    pub denylist: HashSet<String>,
    /// Ceiling on the estimated deploy cost, in native units.
    pub spend_cap: Decimal,
    pub deploy_gas_units: u64,
    pub native_unit: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denylist: HashSet::from([DEFAULT_DENYLISTED.to_string()]),
            spend_cap: dec!(0.05),
            deploy_gas_units: 3_000_000,
            native_unit: "BNB".to_string(),
        }
    }
}

impl PolicyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let denylist = match list_env("POLICY_DENYLIST")? {
            Some(items) => items.iter().map(|id| id.to_lowercase()).collect(),
            None => defaults.denylist,
        };

        let spend_cap: Decimal = parse_env_or("POLICY_SPEND_CAP", defaults.spend_cap, "a decimal")?;
        if spend_cap.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                key: "POLICY_SPEND_CAP".to_string(),
                message: "must not be negative".to_string(),
            });
        }

        let deploy_gas_units = parse_env_or(
            "POLICY_DEPLOY_GAS_UNITS",
            defaults.deploy_gas_units,
            "a positive integer",
        )?;
        if deploy_gas_units == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLICY_DEPLOY_GAS_UNITS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            denylist,
            spend_cap,
            deploy_gas_units,
            native_unit: optional_env("POLICY_NATIVE_UNIT")?.unwrap_or(defaults.native_unit),
        })
    }
}

/// Pay-per-call settings for the challenge protocol.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Actions that require a settled challenge before they run.
    pub gated_actions: HashSet<ActionKind>,
    pub amount: Decimal,
    pub currency: String,
    /// Recipient advertised in challenges, if any.
    pub pay_to: Option<String>,
    pub challenge_ttl: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gated_actions: HashSet::from([ActionKind::Research, ActionKind::Generate]),
            amount: dec!(0.01),
            currency: "USDC".to_string(),
            pay_to: None,
            challenge_ttl: Duration::from_secs(300),
        }
    }
}

impl PaymentConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let gated_actions = match list_env("PAYMENT_GATED_ACTIONS")? {
            Some(names) => names
                .iter()
                .map(|name| {
                    ActionKind::parse(name).ok_or_else(|| ConfigError::InvalidValue {
                        key: "PAYMENT_GATED_ACTIONS".to_string(),
                        message: format!("unknown action '{name}'"),
                    })
                })
                .collect::<Result<HashSet<_>, _>>()?,
            None => defaults.gated_actions,
        };

        let amount: Decimal = parse_env_or("PAYMENT_AMOUNT", defaults.amount, "a decimal")?;
        if amount <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                key: "PAYMENT_AMOUNT".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let pay_to = optional_env("PAYMENT_PAY_TO")?
            .map(|raw| {
                normalize_wallet_address(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "PAYMENT_PAY_TO".to_string(),
                    message: "must be a 0x-prefixed 20-byte address".to_string(),
                })
            })
            .transpose()?;

        let ttl_secs: u64 = parse_env_or(
            "PAYMENT_CHALLENGE_TTL_SECS",
            defaults.challenge_ttl.as_secs(),
            "a positive integer",
        )?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PAYMENT_CHALLENGE_TTL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            gated_actions,
            amount,
            currency: optional_env("PAYMENT_CURRENCY")?.unwrap_or(defaults.currency),
            pay_to,
            challenge_ttl: Duration::from_secs(ttl_secs),
        })
    }
}
