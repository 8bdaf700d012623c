//! Typed action requests.
//!
//! The HTTP body is loose (every field optional, `amount` may be a string or a
//! number). [`ActionRequest::from_body`] turns it into a fully validated
//! request before any gate runs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::payment::signature::normalize_wallet_address;

/// Fixed set of workflow steps a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Research,
    Generate,
    Audit,
    Deploy,
    Transfer,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        Self::Research,
        Self::Generate,
        Self::Audit,
        Self::Deploy,
        Self::Transfer,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Generate => "generate",
            Self::Audit => "audit",
            Self::Deploy => "deploy",
            Self::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target chain profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl Network {
    /// Missing means testnet; anything other than testnet/mainnet is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self, GatewayError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::Testnet);
        };
        if raw.eq_ignore_ascii_case("testnet") {
            Ok(Self::Testnet)
        } else if raw.eq_ignore_ascii_case("mainnet") {
            Ok(Self::Mainnet)
        } else {
            Err(GatewayError::invalid_input(
                "network",
                format!("expected 'testnet' or 'mainnet', got '{raw}'"),
            ))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of `POST /api/agent`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequestBody {
    pub action: Option<String>,
    pub prompt: Option<String>,
    pub code: Option<String>,
    pub user_address: Option<String>,
    pub network: Option<String>,
    pub to_address: Option<String>,
    pub amount: Option<serde_json::Value>,
}

/// Action-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionParams {
    Research { prompt: String },
    Generate { prompt: String },
    Audit { code: String },
    Deploy { code: String },
    Transfer { to_address: String, amount: Decimal },
}

/// A validated request, ready for the gate pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Lowercased caller identity. Never empty.
    pub caller_id: String,
    pub network: Network,
    pub params: ActionParams,
}

impl ActionRequest {
    pub fn from_body(
        kind: ActionKind,
        caller_id: String,
        body: &AgentRequestBody,
    ) -> Result<Self, GatewayError> {
        let network = Network::parse(body.network.as_deref())?;
        let params = match kind {
            ActionKind::Research => ActionParams::Research {
                prompt: required_text("prompt", body.prompt.as_deref())?,
            },
            ActionKind::Generate => ActionParams::Generate {
                prompt: required_text("prompt", body.prompt.as_deref())?,
            },
            ActionKind::Audit => ActionParams::Audit {
                code: required_text("code", body.code.as_deref())?,
            },
            ActionKind::Deploy => ActionParams::Deploy {
                code: required_text("code", body.code.as_deref())?,
            },
            ActionKind::Transfer => ActionParams::Transfer {
                to_address: parse_recipient(body.to_address.as_deref())?,
                amount: parse_amount(body.amount.as_ref())?,
            },
        };
        Ok(Self {
            caller_id,
            network,
            params,
        })
    }

    pub fn kind(&self) -> ActionKind {
        match self.params {
            ActionParams::Research { .. } => ActionKind::Research,
            ActionParams::Generate { .. } => ActionKind::Generate,
            ActionParams::Audit { .. } => ActionKind::Audit,
            ActionParams::Deploy { .. } => ActionKind::Deploy,
            ActionParams::Transfer { .. } => ActionKind::Transfer,
        }
    }
}

fn required_text(field: &'static str, value: Option<&str>) -> Result<String, GatewayError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(GatewayError::invalid_input(field, "must not be empty")),
    }
}

fn parse_recipient(value: Option<&str>) -> Result<String, GatewayError> {
    let raw = value.unwrap_or_default();
    normalize_wallet_address(raw).ok_or_else(|| {
        GatewayError::invalid_input("toAddress", "must be 0x followed by 40 hex characters")
    })
}

/// Positive decimal with at most 18 fractional digits (one wei).
fn parse_amount(value: Option<&serde_json::Value>) -> Result<Decimal, GatewayError> {
    let raw = match value {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(GatewayError::invalid_input("amount", "is required")),
    };

    let mut parts = raw.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty()
        || !digits_only(whole)
        || !digits_only(fraction)
        || raw.ends_with('.')
    {
        return Err(GatewayError::invalid_input(
            "amount",
            format!("'{raw}' is not a plain decimal number"),
        ));
    }
    if fraction.len() > 18 {
        return Err(GatewayError::invalid_input(
            "amount",
            "at most 18 fractional digits are supported",
        ));
    }

    let amount = Decimal::from_str_exact(&raw).map_err(|e| {
        GatewayError::invalid_input("amount", format!("'{raw}' cannot be represented exactly: {e}"))
    })?;
    if amount <= Decimal::ZERO {
        return Err(GatewayError::invalid_input("amount", "must be greater than zero"));
    }
    Ok(amount.normalize())
}
