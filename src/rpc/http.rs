//! JSON-RPC 2.0 over HTTP
//!
//! Thin [`RpcTransport`] implementation on top of `reqwest`. Transactions
//! are sent base64 encoded. One `HttpTransport` is meant to be shared
//! (behind an `Arc`) by every confirmation loop talking to the same node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::rpc_errors::RpcError;
use super::{Commitment, LatestBlockhash, RpcTransport, SendOptions, SignatureStatus};
use crate::types::{Hash, Signature};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

/// `{"context": {...}, "value": ...}` wrapper
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignatureStatus {
    slot: u64,
    confirmations: Option<u64>,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<Commitment>,
}

impl From<RawSignatureStatus> for SignatureStatus {
    fn from(raw: RawSignatureStatus) -> Self {
        Self {
            slot: raw.slot,
            confirmations: raw.confirmations,
            err: raw.err.map(|e| e.to_string()),
            confirmation_status: raw.confirmation_status,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

/// HTTP JSON-RPC client for one node
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport {
                endpoint: url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and decode its `result`
    #[instrument(skip(self, params), fields(endpoint = %self.url))]
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(id, "Sending RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::RateLimited {
                endpoint: self.url.clone(),
            });
        }
        if !status.is_success() {
            return Err(RpcError::Transport {
                endpoint: self.url.clone(),
                message: format!("HTTP {}", status),
            });
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(err) = parsed.error {
            debug!(id, code = err.code, message = %err.message, "RPC returned error");
            return Err(RpcError::from_rpc_error(err.code, &err.message));
        }

        let result = parsed
            .result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{}: missing result", method)))?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout {
                endpoint: self.url.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RpcError::Transport {
                endpoint: self.url.clone(),
                message: err.to_string(),
            }
        }
    }
}

/// Build the config object that accompanies `sendTransaction`
pub(crate) fn send_config(opts: &SendOptions) -> Value {
    let mut config = Map::new();
    config.insert("encoding".to_string(), json!("base64"));
    config.insert("skipPreflight".to_string(), json!(opts.skip_preflight));
    if let Some(c) = opts.preflight_commitment {
        config.insert("preflightCommitment".to_string(), json!(c.as_str()));
    }
    if let Some(n) = opts.max_retries {
        config.insert("maxRetries".to_string(), json!(n));
    }
    Value::Object(config)
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send_transaction(
        &self,
        wire: &[u8],
        opts: &SendOptions,
    ) -> Result<Signature, RpcError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire);
        let sig: String = self
            .call("sendTransaction", json!([encoded, send_config(opts)]))
            .await?;
        sig.parse()
            .map_err(|e| RpcError::InvalidResponse(format!("sendTransaction: {}", e)))
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
        let sigs: Vec<String> = signatures.iter().map(|s| s.to_string()).collect();
        let response: WithContext<Vec<Option<RawSignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([sigs, {"searchTransactionHistory": false}]),
            )
            .await?;

        if response.value.len() != signatures.len() {
            return Err(RpcError::InvalidResponse(format!(
                "getSignatureStatuses: {} statuses for {} signatures",
                response.value.len(),
                signatures.len()
            )));
        }
        Ok(response
            .value
            .into_iter()
            .map(|s| s.map(SignatureStatus::from))
            .collect())
    }

    async fn get_block_height(&self, commitment: Commitment) -> Result<u64, RpcError> {
        self.call("getBlockHeight", json!([{"commitment": commitment.as_str()}]))
            .await
    }

    async fn get_latest_blockhash(
        &self,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError> {
        let response: WithContext<RawBlockhash> = self
            .call(
                "getLatestBlockhash",
                json!([{"commitment": commitment.as_str()}]),
            )
            .await?;
        let blockhash: Hash = response
            .value
            .blockhash
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("getLatestBlockhash: {}", e)))?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_config_omits_unset_fields() {
        let config = send_config(&SendOptions::default());
        assert_eq!(config, json!({"encoding": "base64", "skipPreflight": false}));

        let config = send_config(&SendOptions {
            skip_preflight: true,
            preflight_commitment: Some(Commitment::Confirmed),
            max_retries: Some(0),
            skip_confirmation: false,
        });
        assert_eq!(
            config,
            json!({
                "encoding": "base64",
                "skipPreflight": true,
                "preflightCommitment": "confirmed",
                "maxRetries": 0,
            })
        );
    }

    #[test]
    fn test_raw_status_conversion() {
        let raw: RawSignatureStatus = serde_json::from_value(json!({
            "slot": 72,
            "confirmations": 10,
            "err": {"InstructionError": [0, {"Custom": 1}]},
            "status": {"Err": {"InstructionError": [0, {"Custom": 1}]}},
            "confirmationStatus": "confirmed"
        }))
        .unwrap();
        let status = SignatureStatus::from(raw);
        assert_eq!(status.slot, 72);
        assert_eq!(status.confirmation_status, Some(Commitment::Confirmed));
        assert_eq!(
            status.err.as_deref(),
            Some(r#"{"InstructionError":[0,{"Custom":1}]}"#)
        );
    }

    #[test]
    fn test_raw_status_null_err() {
        let raw: RawSignatureStatus = serde_json::from_value(json!({
            "slot": 1,
            "confirmations": null,
            "err": null,
            "confirmationStatus": "finalized"
        }))
        .unwrap();
        assert!(SignatureStatus::from(raw).err.is_none());
    }
}
