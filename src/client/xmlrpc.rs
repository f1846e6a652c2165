// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ApplyOutcome, RegistryClient, RegistryOp};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::rpc::{RpcError, Value, XmlRpcClient};
use crate::snapshot::RegistrySnapshot;

/// Registry client speaking XML-RPC to the status endpoints of remote
/// masters and to the local master's registration API.
#[derive(Debug, Clone)]
pub struct XmlRpcRegistryClient {
    http: reqwest::Client,
    local: XmlRpcClient,
    node_name: String,
    node_api_uri: String,
}

impl XmlRpcRegistryClient {
    pub fn new(config: &SyncConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            local: XmlRpcClient::with_http(http.clone(), config.local_master_uri.clone()),
            http,
            node_name: config.node_name.clone(),
            node_api_uri: config.node_api_uri.clone(),
        }
    }

    #[must_use]
    pub fn local_master_uri(&self) -> &str {
        self.local.endpoint()
    }
}

/// Fetch failures caused by the payload rather than the transport.
fn fetch_error(err: RpcError) -> SyncError {
    match err {
        RpcError::Parse(msg) | RpcError::Shape(msg) => SyncError::MalformedSnapshot(msg),
        other => other.into(),
    }
}

/// Decode one `(code, message, payload)` entry. Per-item faults become
/// failure outcomes carrying the fault code.
fn outcome_from_entry(entry: Result<Value, RpcError>) -> ApplyOutcome {
    let value = match entry {
        Ok(value) => value,
        Err(RpcError::Fault { code, message }) => {
            return ApplyOutcome::failure(i32::try_from(code).unwrap_or(i32::MIN), message)
        }
        Err(other) => return ApplyOutcome::failure(-1, other.to_string()),
    };
    match value.as_array() {
        Some([code, message, payload]) => match code.as_i64().and_then(|c| i32::try_from(c).ok()) {
            Some(code) => ApplyOutcome {
                code,
                message: message.as_str().unwrap_or_default().to_string(),
                payload: payload.clone(),
            },
            None => ApplyOutcome::failure(-1, format!("non-integer status code: {}", code.type_name())),
        },
        _ => ApplyOutcome::failure(-1, format!("unexpected result shape: {}", value.type_name())),
    }
}

#[async_trait]
impl RegistryClient for XmlRpcRegistryClient {
    #[instrument(skip(self, timeout))]
    async fn fetch_snapshot(&self, status_uri: &str, timeout: Duration) -> Result<RegistrySnapshot, SyncError> {
        let remote = XmlRpcClient::with_http(self.http.clone(), status_uri);
        let raw = remote.call("masterInfo", &[], timeout).await.map_err(fetch_error)?;
        let snapshot = RegistrySnapshot::from_wire(&raw)?;
        debug!(
            master = snapshot.master_name(),
            nodes = snapshot.nodes().count(),
            topics = snapshot.topics().count(),
            services = snapshot.services().count(),
            "Fetched snapshot"
        );
        Ok(snapshot)
    }

    async fn apply_batch(&self, ops: &[RegistryOp], timeout: Duration) -> Result<Vec<ApplyOutcome>, SyncError> {
        let calls = ops
            .iter()
            .map(|op| (op.method_name().to_string(), op.params()))
            .collect();
        let entries = self.local.multicall(calls, timeout).await?;
        Ok(entries.into_iter().map(outcome_from_entry).collect())
    }

    async fn prime_subscriber_notification(
        &self,
        topic: &str,
        topic_type: &str,
        timeout: Duration,
    ) -> Result<(), SyncError> {
        let caller = Value::from(self.node_name.as_str());
        let api = Value::from(self.node_api_uri.as_str());
        let calls = vec![
            (
                "registerPublisher".to_string(),
                vec![caller.clone(), Value::from(topic), Value::from(topic_type), api.clone()],
            ),
            (
                "unregisterPublisher".to_string(),
                vec![caller, Value::from(topic), api],
            ),
        ];
        for entry in self.local.multicall(calls, timeout).await? {
            let outcome = outcome_from_entry(entry);
            if !outcome.is_success() {
                return Err(SyncError::Transport(format!(
                    "priming {} failed with code {}: {}",
                    topic, outcome.code, outcome.message
                )));
            }
        }
        Ok(())
    }
}
