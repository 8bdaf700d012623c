//! JSON-RPC gas price probe.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::RpcConfig;
use crate::dispatch::Network;
use crate::error::UpstreamError;

/// Source of the current per-gas fee for a network, in wei.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    async fn gas_price_wei(&self, network: Network) -> Result<u128, UpstreamError>;
}

/// `eth_gasPrice` over HTTP against the configured endpoint per network.
pub struct RpcPriceProbe {
    client: reqwest::Client,
    config: RpcConfig,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcPriceProbe {
    pub fn new(config: RpcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    /// Query one endpoint directly. Used by `doctor` as well as the oracle.
    pub async fn probe_url(&self, service: &str, url: &str) -> Result<u128, UpstreamError> {
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "eth_gasPrice",
                "params": [],
                "id": 1,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(service, self.config.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: service.to_string(),
                status: status.as_u16(),
            });
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::from_transport(service, self.config.timeout, e)
                } else {
                    UpstreamError::InvalidResponse {
                        service: service.to_string(),
                        reason: format!("body is not a JSON-RPC response: {e}"),
                    }
                }
            })?;

        if let Some(error) = body.error {
            return Err(UpstreamError::InvalidResponse {
                service: service.to_string(),
                reason: format!("rpc error {}: {}", error.code, error.message),
            });
        }
        let quantity = body.result.ok_or_else(|| UpstreamError::InvalidResponse {
            service: service.to_string(),
            reason: "missing result".to_string(),
        })?;
        parse_quantity(&quantity).map_err(|reason| UpstreamError::InvalidResponse {
            service: service.to_string(),
            reason,
        })
    }
}

#[async_trait]
impl GasPriceOracle for RpcPriceProbe {
    async fn gas_price_wei(&self, network: Network) -> Result<u128, UpstreamError> {
        let service = format!("rpc-{network}");
        let wei = self
            .probe_url(&service, self.config.endpoint(network))
            .await?;
        tracing::debug!(%network, gas_price_wei = %wei, "Fetched gas price");
        Ok(wei)
    }
}

/// Decode a JSON-RPC hex quantity such as `0x12a05f200`.
pub fn parse_quantity(raw: &str) -> Result<u128, String> {
    let hex = raw
        .trim()
        .strip_prefix("0x")
        .or_else(|| raw.trim().strip_prefix("0X"))
        .ok_or_else(|| format!("quantity '{raw}' is not 0x-prefixed"))?;
    if hex.is_empty() {
        return Err("quantity has no digits".to_string());
    }
    u128::from_str_radix(hex, 16).map_err(|e| format!("quantity '{raw}' is not valid hex: {e}"))
}
