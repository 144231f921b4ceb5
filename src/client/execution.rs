//! JSON-RPC client for the downstream execution node.

use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ConsensusInfoSink;
use crate::errors::{Result, SyncError};
use crate::tracker::Epoch;

/// RPC method receiving the minimal consensus info.
pub const INSERT_MINIMAL_CONSENSUS_INFO: &str = "eth_insertMinimalConsensusInfo";

/// Sends minimal consensus info to an execution node over HTTP JSON-RPC.
#[derive(Debug)]
pub struct ExecutionClient {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl ExecutionClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs a JSON-RPC call and decodes its result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("JSON-RPC call {} (id {}) to {}", method, id, self.url);

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Unavailable(format!(
                "execution node ({} returned {})",
                method, status
            )));
        }

        let body: JsonRpcResponse = response.json().await?;
        body.into_result(method)
    }
}

impl ConsensusInfoSink for ExecutionClient {
    async fn insert_minimal_consensus_info(
        &self,
        epoch: Epoch,
        proposer_pub_keys: &[String],
        epoch_start_unix_time: u64,
    ) -> Result<bool> {
        self.call(
            INSERT_MINIMAL_CONSENSUS_INFO,
            insert_params(epoch, proposer_pub_keys, epoch_start_unix_time),
        )
        .await
    }
}

fn insert_params(epoch: Epoch, proposer_pub_keys: &[String], epoch_start_unix_time: u64) -> Value {
    serde_json::json!([epoch, proposer_pub_keys, epoch_start_unix_time])
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn into_result<R: DeserializeOwned>(self, method: &str) -> Result<R> {
        if let Some(error) = self.error {
            return Err(SyncError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = self
            .result
            .ok_or_else(|| SyncError::Decode(format!("{}: response has no result", method)))?;
        serde_json::from_value(result).map_err(|e| SyncError::Decode(format!("{}: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let keys = vec!["0x".to_string(), "0xab12".to_string()];
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 3,
            method: INSERT_MINIMAL_CONSENSUS_INFO,
            params: insert_params(0, &keys, 1_600_000_000),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "eth_insertMinimalConsensusInfo",
                "params": [0, ["0x", "0xab12"], 1_600_000_000u64]
            })
        );
    }

    #[test]
    fn test_bool_result() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":false}"#).unwrap();
        let accepted: bool = response.into_result(INSERT_MINIMAL_CONSENSUS_INFO).unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_error_object_maps_to_rpc_error() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        let err = response
            .into_result::<bool>(INSERT_MINIMAL_CONSENSUS_INFO)
            .unwrap_err();
        assert!(matches!(err, SyncError::Rpc { code: -32601, .. }));
    }

    #[test]
    fn test_missing_result_is_decode_error() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(matches!(
            response.into_result::<bool>(INSERT_MINIMAL_CONSENSUS_INFO),
            Err(SyncError::Decode(_))
        ));
    }
}
