// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::codec::{decode_response, encode_call, fault_from_value};
use super::value::Value;
use super::RpcError;

/// HTTP client bound to one XML-RPC endpoint.
#[derive(Debug, Clone)]
pub struct XmlRpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl XmlRpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), endpoint)
    }

    /// Share an existing connection pool.
    pub fn with_http(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke `method` and return its decoded result.
    pub async fn call(&self, method: &str, params: &[Value], timeout: Duration) -> Result<Value, RpcError> {
        let body = encode_call(method, params);
        debug!(endpoint = %self.endpoint, method, "xml-rpc call");

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(format!("{} returned {}", self.endpoint, status)));
        }

        let text = response.text().await.map_err(|e| classify(e, timeout))?;
        decode_response(&text)
    }

    /// Run several calls as one `system.multicall` round trip.
    ///
    /// The outer result fails only if the round trip itself fails; each inner
    /// result reflects the individual call (a fault entry becomes
    /// [`RpcError::Fault`]).
    pub async fn multicall(
        &self,
        calls: Vec<(String, Vec<Value>)>,
        timeout: Duration,
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let expected = calls.len();
        let encoded: Vec<Value> = calls
            .into_iter()
            .map(|(method, params)| {
                Value::Struct(BTreeMap::from([
                    ("methodName".to_string(), Value::String(method)),
                    ("params".to_string(), Value::Array(params)),
                ]))
            })
            .collect();

        let response = self
            .call("system.multicall", &[Value::Array(encoded)], timeout)
            .await?;
        let entries = response
            .as_array()
            .ok_or_else(|| RpcError::Shape(format!("multicall returned {}", response.type_name())))?;
        if entries.len() != expected {
            return Err(RpcError::Shape(format!(
                "multicall returned {} results for {} calls",
                entries.len(),
                expected
            )));
        }

        Ok(entries.iter().map(unwrap_multicall_entry).collect())
    }
}

/// Successful entries are wrapped in a one-element array, faults are structs.
fn unwrap_multicall_entry(entry: &Value) -> Result<Value, RpcError> {
    match entry {
        Value::Array(items) if items.len() == 1 => Ok(items[0].clone()),
        Value::Struct(_) => Err(fault_from_value(entry)),
        other => Err(RpcError::Shape(format!("multicall entry was {}", other.type_name()))),
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout(timeout)
    } else {
        RpcError::Http(err.to_string())
    }
}
