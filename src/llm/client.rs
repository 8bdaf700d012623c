use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::LlmConfig;
use crate::error::UpstreamError;
use crate::llm::{CompletionRequest, Model, TextGenerator, decode_envelope};

const SERVICE: &str = "chaingpt";

/// HTTP client for the ChainGPT chat endpoint.
pub struct ChainGptClient {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequestBody<'a> {
    model: Model,
    question: &'a str,
    chat_history: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdk_unique_id: Option<&'a str>,
}

impl ChainGptClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl TextGenerator for ChainGptClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
        let body = ChatRequestBody {
            model: request.model,
            question: &request.question,
            chat_history: if request.chat_history { "on" } else { "off" },
            sdk_unique_id: request.session_id.as_deref(),
        };

        tracing::debug!(model = request.model.as_str(), "Calling text generation service");
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(SERVICE, self.config.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: SERVICE.to_string(),
                status: status.as_u16(),
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_transport(SERVICE, self.config.timeout, e))?;
        Ok(decode_envelope(&raw))
    }
}
