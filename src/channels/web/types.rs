//! Request and response DTOs for the web gateway API.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::dispatch::ActionResult;
use crate::error::{GatewayError, RuntimeErrorPayload};
use crate::payment::PaymentRequirement;

pub use crate::dispatch::AgentRequestBody;

// --- Agent ---

/// `200` body: `success` plus the action-specific fields, flattened.
#[derive(Debug, Serialize)]
pub struct AgentSuccessResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: ActionResult,
}

impl AgentSuccessResponse {
    pub fn new(result: ActionResult) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// `402` body announcing a fresh challenge.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub payment_details: PaymentRequirement,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<Decimal>,
    /// Toolchain output of a failed deploy or transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl ErrorResponse {
    pub fn rate_limited() -> Self {
        Self {
            success: false,
            error: "Rate limit exceeded. Try again shortly.".to_string(),
            code: "request.rate_limited",
            retryable: true,
            estimated_cost: None,
            raw_output: None,
        }
    }
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        let RuntimeErrorPayload {
            code,
            retryable,
            message,
            ..
        } = err.to_runtime_error_payload();
        let estimated_cost = match err {
            GatewayError::PolicyViolation { estimated_cost, .. } => *estimated_cost,
            _ => None,
        };
        let raw_output = match err {
            GatewayError::DeploymentFailed { raw_output, .. } => Some(raw_output.clone()),
            _ => None,
        };
        Self {
            success: false,
            error: message,
            code,
            retryable,
            estimated_cost,
            raw_output,
        }
    }
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel: &'static str,
}
