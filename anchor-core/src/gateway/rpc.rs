//! JSON-RPC 2.0 transport shared by the remote ledger adapters

use crate::error::{GatewayError, GatewayResult};
use crate::types::EventType;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// RPC error code for a missing record
pub const CODE_NOT_FOUND: i64 = -32001;

/// RPC error code for a submission that missed its consensus deadline
pub const CODE_CONSENSUS_TIMEOUT: i64 = -32002;

/// Minimal JSON-RPC client
#[derive(Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcClient {
    /// Client for `url` with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Gateway URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke `method` and decode its result
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> GatewayResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method = %method, id, "RPC call");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("{} returned {}", method, status)));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("{} returned {}", method, status)));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if let Some(err) = envelope.error {
            return Err(match err.code {
                CODE_NOT_FOUND => GatewayError::NotFound(err.message),
                CODE_CONSENSUS_TIMEOUT => GatewayError::ConsensusTimeout(self.timeout),
                _ => GatewayError::Rejected(format!("{} ({})", err.message, err.code)),
            });
        }

        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| GatewayError::Rejected(format!("malformed {} result: {}", method, e)))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::ConsensusTimeout(self.timeout)
        } else if err.is_decode() {
            GatewayError::Rejected(format!("malformed response: {}", err))
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

/// Read a quantity given as a JSON number, `0x` hex, or decimal string
pub fn parse_quantity(value: &Value) -> GatewayResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| GatewayError::Rejected(format!("not an unsigned quantity: {}", n))),
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|_| GatewayError::Rejected(format!("not a quantity: {}", s)))
        }
        Value::Null => Ok(0),
        other => Err(GatewayError::Rejected(format!("not a quantity: {}", other))),
    }
}

/// Quantity field of an object, 0 when absent
pub fn quantity_field(object: &Value, key: &str) -> GatewayResult<u64> {
    object.get(key).map_or(Ok(0), parse_quantity)
}

/// String field of an object, empty when absent
pub fn string_field(object: &Value, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map a ledger event name onto [`EventType`]
pub fn parse_event_type(name: &str) -> Option<EventType> {
    match name {
        "DataUploaded" => Some(EventType::DataUploaded),
        "ReconciliationEvent" => Some(EventType::ReconciliationEvent),
        "InstitutionRegistered" => Some(EventType::InstitutionRegistered),
        _ => None,
    }
}
