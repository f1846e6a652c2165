// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry client abstraction.
//!
//! A session talks to registries only through [`RegistryClient`]: it pulls
//! remote snapshots and pushes mutation batches to the local registry.
//!
//! - [`XmlRpcRegistryClient`]: the real transport
//! - [`InMemoryRegistry`]: deterministic backend for tests and demos

pub mod memory;
mod xmlrpc;

pub use memory::{InMemoryRegistry, RegistryCall};
pub use xmlrpc::XmlRpcRegistryClient;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::SyncError;
use crate::registration::Registration;
use crate::rpc::Value;
use crate::snapshot::RegistrySnapshot;

/// Status code of a successful registry call.
pub const SUCCESS_CODE: i32 = 1;

/// A single local registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    Register(Registration),
    Unregister(Registration),
}

impl RegistryOp {
    #[must_use]
    pub fn registration(&self) -> &Registration {
        match self {
            Self::Register(r) | Self::Unregister(r) => r,
        }
    }

    #[must_use]
    pub fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Registry API method implementing this operation.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Register(Registration::Publication { .. }) => "registerPublisher",
            Self::Unregister(Registration::Publication { .. }) => "unregisterPublisher",
            Self::Register(Registration::Subscription { .. }) => "registerSubscriber",
            Self::Unregister(Registration::Subscription { .. }) => "unregisterSubscriber",
            Self::Register(Registration::ServiceProvision { .. }) => "registerService",
            Self::Unregister(Registration::ServiceProvision { .. }) => "unregisterService",
        }
    }

    /// Positional arguments of [`Self::method_name`]. The mirrored node is the caller.
    #[must_use]
    pub fn params(&self) -> Vec<Value> {
        let s = |v: &str| Value::from(v);
        match self {
            Self::Register(Registration::Publication { topic, topic_type, node, node_uri })
            | Self::Register(Registration::Subscription { topic, topic_type, node, node_uri }) => {
                vec![s(node), s(topic), s(topic_type), s(node_uri)]
            }
            Self::Unregister(Registration::Publication { topic, node, node_uri, .. })
            | Self::Unregister(Registration::Subscription { topic, node, node_uri, .. }) => {
                vec![s(node), s(topic), s(node_uri)]
            }
            Self::Register(Registration::ServiceProvision { service, service_uri, node, node_uri }) => {
                vec![s(node), s(service), s(service_uri), s(node_uri)]
            }
            Self::Unregister(Registration::ServiceProvision { service, service_uri, node, .. }) => {
                vec![s(node), s(service), s(service_uri)]
            }
        }
    }
}

impl fmt::Display for RegistryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.method_name(), self.registration())
    }
}

/// `(code, message, payload)` answer to one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub code: i32,
    pub message: String,
    pub payload: Value,
}

impl ApplyOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: String::new(),
            payload,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payload: Value::Nil,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// The per-item error for a rejected `op`.
    #[must_use]
    pub fn to_error(&self, op: &RegistryOp) -> SyncError {
        SyncError::PartialApply {
            operation: op.method_name().to_string(),
            code: self.code,
            message: self.message.clone(),
        }
    }
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Pull the registration snapshot served at `status_uri`.
    async fn fetch_snapshot(&self, status_uri: &str, timeout: Duration) -> Result<RegistrySnapshot, SyncError>;

    /// Apply `ops` to the local registry as one round trip, in order.
    ///
    /// On success the result has exactly one outcome per op. An `Err` means
    /// the batch as a whole failed and nothing can be assumed about the items.
    async fn apply_batch(&self, ops: &[RegistryOp], timeout: Duration) -> Result<Vec<ApplyOutcome>, SyncError>;

    /// Make the local registry re-announce the publishers of `topic`.
    ///
    /// Some registries do not send a publisher-update notification to a
    /// subscriber that registers after the publishers. Registering and then
    /// retracting a throwaway publisher on the topic forces one.
    async fn prime_subscriber_notification(
        &self,
        topic: &str,
        topic_type: &str,
        timeout: Duration,
    ) -> Result<(), SyncError>;
}
