//! External text-generation client.
//!
//! The service is treated as opaque: a request selects a model and carries a
//! question, the response envelope is decoded when possible and used verbatim
//! otherwise.

mod client;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::UpstreamError;

pub use self::client::ChainGptClient;

/// Model selector understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    GeneralAssistant,
    SmartContractGenerator,
    SmartContractAuditor,
}

impl Model {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralAssistant => "general_assistant",
            Self::SmartContractGenerator => "smart_contract_generator",
            Self::SmartContractAuditor => "smart_contract_auditor",
        }
    }
}

const GENERATE_INSTRUCTIONS: &str = "RESPOND ONLY WITH PURE SOLIDITY CODE. NO MARKDOWN. NO EXPLANATION.
Create a contract named 'GenContract'.
IMPORTANT: Hardcode all values (name, symbol, supply) directly in the code.
DO NOT require constructor arguments.
REQUIRED: Include 'receive() external payable {}' so the contract can accept BNB.
Ensure Solidity ^0.8.20.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: Model,
    pub question: String,
    pub chat_history: bool,
    /// Opaque per-caller conversation id.
    pub session_id: Option<String>,
}

impl CompletionRequest {
    pub fn research(prompt: &str, caller_id: &str) -> Self {
        Self {
            model: Model::GeneralAssistant,
            question: prompt.to_string(),
            chat_history: true,
            session_id: Some(session_id_for(caller_id)),
        }
    }

    pub fn generate(prompt: &str, caller_id: &str) -> Self {
        Self {
            model: Model::SmartContractGenerator,
            question: format!("{GENERATE_INSTRUCTIONS}\nUser Prompt: {prompt}"),
            chat_history: true,
            session_id: Some(session_id_for(caller_id)),
        }
    }

    pub fn audit(code: &str) -> Self {
        Self {
            model: Model::SmartContractAuditor,
            question: format!("Audit this Solidity code for security flaws:\n\n{code}"),
            chat_history: false,
            session_id: None,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generated text, already unwrapped from the response envelope.
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError>;
}

/// Pull `data.bot` out of the envelope; fall back to the raw body.
pub fn decode_envelope(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .as_ref()
        .and_then(|value| value.get("data"))
        .and_then(|data| data.get("bot"))
        .and_then(|bot| bot.as_str())
        .filter(|bot| !bot.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string())
}

/// Remove markdown code fences around generated source.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```solidity", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// UUID-shaped id derived from the caller: drop `0x`, lowercase, pad with `0`
/// to 32 characters, then group 8-4-4-4-12.
pub fn session_id_for(caller_id: &str) -> String {
    let cleaned = caller_id.trim().replacen("0x", "", 1).to_lowercase();
    let mut chars: Vec<char> = cleaned.chars().take(32).collect();
    chars.resize(32, '0');
    let group = |range: std::ops::Range<usize>| chars[range].iter().collect::<String>();
    format!(
        "{}-{}-{}-{}-{}",
        group(0..8),
        group(8..12),
        group(12..16),
        group(16..20),
        group(20..32)
    )
}
