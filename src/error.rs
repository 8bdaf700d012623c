//! Error types for Quackgate.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// HTTP surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },
}

/// Failures talking to an upstream HTTP service (price probe, text generation).
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} returned HTTP {status}")]
    Status { service: String, status: u16 },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl UpstreamError {
    /// Classify a reqwest transport error, keeping timeouts distinct.
    pub fn from_transport(service: &str, timeout: Duration, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                service: service.to_string(),
                timeout,
            }
        } else {
            Self::RequestFailed {
                service: service.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

/// Payment proof rejections. All of them are terminal for the attempt.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("malformed payment proof: {0}")]
    MalformedProof(String),

    #[error("no outstanding challenge {0}")]
    UnknownChallenge(String),

    #[error("challenge {0} expired")]
    Expired(String),

    #[error("proof signer does not match the caller")]
    SignerMismatch,

    #[error("request does not match the challenged action")]
    ActionMismatch,

    #[error("signature rejected: {0}")]
    BadSignature(String),
}

/// Deployment subprocess failures.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("failed to stage {path}: {reason}")]
    Staging { path: String, reason: String },

    #[error("failed to launch deploy command: {0}")]
    Spawn(String),

    #[error("deploy command timed out after {timeout:?}")]
    Timeout { timeout: Duration, output: String },

    #[error("deploy command exited with {status}")]
    NonZeroExit { status: String, output: String },
}

impl DeploymentError {
    /// Captured subprocess output, when the process got far enough to print any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } | Self::NonZeroExit { output, .. } => Some(output),
            Self::Staging { .. } | Self::Spawn(_) => None,
        }
    }
}

/// Which policy check denied the request.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    MissingIdentity,
    Denylisted,
    SpendCapExceeded,
}

impl PolicyRule {
    fn code(self) -> &'static str {
        match self {
            Self::MissingIdentity => "policy.missing_identity",
            Self::Denylisted => "policy.denylisted",
            Self::SpendCapExceeded => "policy.spend_cap_exceeded",
        }
    }
}

/// Caller-facing failure of a dispatched action.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Policy Violation: {reason}")]
    PolicyViolation {
        rule: PolicyRule,
        reason: String,
        estimated_cost: Option<Decimal>,
    },

    #[error("Payment invalid: {0}")]
    PaymentInvalid(#[from] PaymentError),

    #[error("Upstream timeout: {service} did not answer within {timeout:?}")]
    UpstreamTimeout { service: String, timeout: Duration },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Deployment failed: {reason}")]
    DeploymentFailed { reason: String, raw_output: String },

    #[error("Invalid action")]
    InvalidAction(String),

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout { service, timeout } => {
                Self::UpstreamTimeout { service, timeout }
            }
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<DeploymentError> for GatewayError {
    fn from(err: DeploymentError) -> Self {
        let raw_output = err.raw_output().unwrap_or_default().to_string();
        let reason = match &err {
            DeploymentError::Timeout { .. } => "timeout".to_string(),
            other => other.to_string(),
        };
        Self::DeploymentFailed { reason, raw_output }
    }
}

impl GatewayError {
    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Map gateway errors into a structured surface for HTTP and log consumers.
    pub fn to_runtime_error_payload(&self) -> RuntimeErrorPayload {
        match self {
            Self::PolicyViolation { rule, .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Policy,
                rule.code(),
                false,
                self.to_string(),
            ),
            Self::PaymentInvalid(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Payment,
                "payment.invalid",
                false,
                self.to_string(),
            ),
            Self::UpstreamTimeout { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Upstream,
                "upstream.timeout",
                true,
                self.to_string(),
            ),
            Self::Upstream(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Upstream,
                "upstream.error",
                true,
                self.to_string(),
            ),
            Self::DeploymentFailed { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Deployment,
                "deployment.failed",
                false,
                self.to_string(),
            ),
            Self::InvalidAction(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Request,
                "request.invalid_action",
                false,
                self.to_string(),
            ),
            Self::InvalidInput { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Request,
                "request.invalid_input",
                false,
                self.to_string(),
            ),
        }
    }
}

/// Structured failure domains for HTTP and log consumers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorDomain {
    Policy,
    Payment,
    Upstream,
    Deployment,
    Request,
}

/// Structured runtime error payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuntimeErrorPayload {
    pub domain: RuntimeErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl RuntimeErrorPayload {
    fn new(
        domain: RuntimeErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}
