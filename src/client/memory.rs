// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic in-process registry.
//!
//! Serves remote snapshots keyed by status URI, keeps the local registration
//! table, logs every call with the (tokio) time it arrived, and lets tests
//! inject fetch failures, batch failures and per-item rejections.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{ApplyOutcome, RegistryClient, RegistryOp};
use crate::error::SyncError;
use crate::registration::Registration;
use crate::rpc::Value;
use crate::snapshot::RegistrySnapshot;

/// One logged interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    Fetch { status_uri: String, at: Instant },
    Apply { ops: Vec<RegistryOp>, at: Instant },
    Prime { topic: String, topic_type: String, at: Instant },
}

impl RegistryCall {
    #[must_use]
    pub fn at(&self) -> Instant {
        match self {
            Self::Fetch { at, .. } | Self::Apply { at, .. } | Self::Prime { at, .. } => *at,
        }
    }
}

pub struct InMemoryRegistry {
    master_uri: String,
    remotes: DashMap<String, RegistrySnapshot>,
    registered: Mutex<BTreeSet<Registration>>,
    calls: Mutex<Vec<RegistryCall>>,
    fetch_failures: DashMap<String, usize>,
    batch_failures: AtomicUsize,
    rejections: DashMap<Registration, (i32, String)>,
    fetch_delay: Mutex<Option<Duration>>,
}

impl InMemoryRegistry {
    /// Registry whose local master lives at `master_uri`.
    #[must_use]
    pub fn new(master_uri: impl Into<String>) -> Self {
        Self {
            master_uri: master_uri.into(),
            remotes: DashMap::new(),
            registered: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
            fetch_failures: DashMap::new(),
            batch_failures: AtomicUsize::new(0),
            rejections: DashMap::new(),
            fetch_delay: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    /// Serve `snapshot` at `status_uri`, replacing what was there.
    pub fn set_remote(&self, status_uri: &str, snapshot: RegistrySnapshot) {
        self.remotes.insert(status_uri.to_string(), snapshot);
    }

    pub fn remove_remote(&self, status_uri: &str) {
        self.remotes.remove(status_uri);
    }

    /// Fail the next `count` fetches of `status_uri` with a transport error.
    pub fn fail_fetches(&self, status_uri: &str, count: usize) {
        self.fetch_failures.insert(status_uri.to_string(), count);
    }

    /// Fail the next `count` batches as a whole.
    pub fn fail_batches(&self, count: usize) {
        self.batch_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every registration of `registration` with `code`.
    pub fn reject(&self, registration: Registration, code: i32, message: impl Into<String>) {
        self.rejections.insert(registration, (code, message.into()));
    }

    pub fn clear_rejections(&self) {
        self.rejections.clear();
    }

    /// Delay every fetch, simulating a slow remote.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    /// Register directly, bypassing the call log.
    pub fn insert_local(&self, registration: Registration) {
        self.registered.lock().insert(registration);
    }

    /// Current local registration table.
    #[must_use]
    pub fn registered(&self) -> BTreeSet<Registration> {
        self.registered.lock().clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Every mutation applied so far, in order, across all batches.
    #[must_use]
    pub fn applied_ops(&self) -> Vec<RegistryOp> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RegistryCall::Apply { ops, .. } => Some(ops.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Applied mutations using registry method `method`.
    #[must_use]
    pub fn ops_named(&self, method: &str) -> Vec<RegistryOp> {
        self.applied_ops()
            .into_iter()
            .filter(|op| op.method_name() == method)
            .collect()
    }

    #[must_use]
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RegistryCall::Fetch { .. }))
            .map(RegistryCall::at)
            .collect()
    }

    #[must_use]
    pub fn primed_topics(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RegistryCall::Prime { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of the local master built from its registration table.
    #[must_use]
    pub fn local_snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::new(self.master_uri.clone(), None);
        for registration in self.registered.lock().iter() {
            match registration {
                Registration::Publication { topic, topic_type, node, .. } => {
                    snapshot.add_publisher(topic, node);
                    snapshot.set_topic_type(topic, topic_type);
                }
                Registration::Subscription { topic, topic_type, node, .. } => {
                    snapshot.add_subscriber(topic, node);
                    snapshot.set_topic_type(topic, topic_type);
                }
                Registration::ServiceProvision { service, service_uri, node, .. } => {
                    snapshot.add_service_provider(service, node);
                    snapshot.set_service(service, Some(service_uri), &self.master_uri, None);
                }
            }
            snapshot.set_node(
                registration.node(),
                Some(registration.node_uri()),
                &self.master_uri,
                None,
            );
        }
        snapshot
    }

    fn log(&self, call: RegistryCall) {
        self.calls.lock().push(call);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Node URIs of the local publishers of `topic`.
    fn publisher_uris(registered: &BTreeSet<Registration>, wanted: &str) -> Value {
        Value::Array(
            registered
                .iter()
                .filter_map(|r| match r {
                    Registration::Publication { topic, node_uri, .. } if topic == wanted => {
                        Some(Value::from(node_uri.as_str()))
                    }
                    _ => None,
                })
                .collect(),
        )
    }

    fn apply_one(&self, registered: &mut BTreeSet<Registration>, op: &RegistryOp) -> ApplyOutcome {
        if let Some(rejection) = self.rejections.get(op.registration()) {
            let (code, message) = rejection.value();
            return ApplyOutcome::failure(*code, message.clone());
        }
        match op {
            RegistryOp::Register(registration) => {
                registered.insert(registration.clone());
                match registration {
                    Registration::Subscription { topic, .. } => {
                        ApplyOutcome::success(Self::publisher_uris(registered, topic))
                    }
                    _ => ApplyOutcome::success(Value::Int(1)),
                }
            }
            RegistryOp::Unregister(registration) => {
                let existed = registered.remove(registration);
                ApplyOutcome::success(Value::Int(i64::from(existed)))
            }
        }
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn fetch_snapshot(&self, status_uri: &str, _timeout: Duration) -> Result<RegistrySnapshot, SyncError> {
        self.log(RegistryCall::Fetch {
            status_uri: status_uri.to_string(),
            at: Instant::now(),
        });
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(mut remaining) = self.fetch_failures.get_mut(status_uri) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::Transport(format!("{} unreachable", status_uri)));
            }
        }
        self.remotes
            .get(status_uri)
            .map(|s| s.value().clone())
            .ok_or_else(|| SyncError::Transport(format!("no registry at {}", status_uri)))
    }

    async fn apply_batch(&self, ops: &[RegistryOp], _timeout: Duration) -> Result<Vec<ApplyOutcome>, SyncError> {
        self.log(RegistryCall::Apply {
            ops: ops.to_vec(),
            at: Instant::now(),
        });
        if Self::take_failure(&self.batch_failures) {
            return Err(SyncError::Transport("batch timed out".into()));
        }
        let mut registered = self.registered.lock();
        Ok(ops.iter().map(|op| self.apply_one(&mut registered, op)).collect())
    }

    async fn prime_subscriber_notification(
        &self,
        topic: &str,
        topic_type: &str,
        _timeout: Duration,
    ) -> Result<(), SyncError> {
        self.log(RegistryCall::Prime {
            topic: topic.to_string(),
            topic_type: topic_type.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "http://local:11311/";
    const STATUS: &str = "http://remote:11611/";

    fn publication() -> Registration {
        Registration::publication("/scan", "sensor/Scan", "/lidar", "http://remote:40001/")
    }

    #[tokio::test]
    async fn test_new_registry_is_empty() {
        let registry = InMemoryRegistry::new(LOCAL);
        assert!(registry.registered().is_empty());
        assert!(registry.calls().is_empty());
        assert_eq!(registry.master_uri(), LOCAL);
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = InMemoryRegistry::new(LOCAL);
        let ops = vec![RegistryOp::Register(publication())];
        let outcomes = registry.apply_batch(&ops, Duration::from_secs(3)).await.unwrap();
        assert!(outcomes[0].is_success());
        assert!(registry.registered().contains(&publication()));

        let ops = vec![RegistryOp::Unregister(publication())];
        let outcomes = registry.apply_batch(&ops, Duration::from_secs(3)).await.unwrap();
        assert_eq!(outcomes[0].payload, Value::Int(1));
        assert!(registry.registered().is_empty());
        assert_eq!(registry.ops_named("unregisterPublisher").len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_payload_lists_publishers() {
        let registry = InMemoryRegistry::new(LOCAL);
        registry.insert_local(Registration::publication("/cmd", "geo/Twist", "/teleop", "http://local:40000/"));
        let sub = Registration::subscription("/cmd", "geo/Twist", "/base", "http://remote:40002/");
        let outcomes = registry
            .apply_batch(&[RegistryOp::Register(sub)], Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(
            outcomes[0].payload,
            Value::Array(vec![Value::from("http://local:40000/")])
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let registry = InMemoryRegistry::new(LOCAL);
        registry.set_remote(STATUS, RegistrySnapshot::new("http://remote:11311/", None));
        registry.fail_fetches(STATUS, 1);
        assert!(registry.fetch_snapshot(STATUS, Duration::from_secs(1)).await.is_err());
        assert!(registry.fetch_snapshot(STATUS, Duration::from_secs(1)).await.is_ok());
        assert!(registry.fetch_snapshot("http://nowhere:1/", Duration::from_secs(1)).await.is_err());

        registry.fail_batches(1);
        let ops = vec![RegistryOp::Register(publication())];
        assert!(registry.apply_batch(&ops, Duration::from_secs(1)).await.is_err());
        assert!(registry.registered().is_empty());
        assert!(registry.apply_batch(&ops, Duration::from_secs(1)).await.is_ok());

        registry.reject(publication(), 0, "denied");
        let outcomes = registry.apply_batch(&ops, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcomes[0], ApplyOutcome::failure(0, "denied"));
        assert_eq!(registry.fetch_times().len(), 3);
    }

    #[tokio::test]
    async fn test_local_snapshot_marks_local_nodes() {
        let registry = InMemoryRegistry::new(LOCAL);
        registry.insert_local(Registration::publication("/chatter", "std/String", "/talker", "http://local:40000/"));
        registry.insert_local(publication());
        let snapshot = registry.local_snapshot();
        assert!(snapshot.node("/talker").unwrap().local);
        // mirrored from elsewhere: registered here but hosted remotely
        assert!(!snapshot.node("/lidar").unwrap().local);
        assert_eq!(snapshot.topic_has_local_endpoint("/chatter"), Some(true));
        assert_eq!(snapshot.topic_has_local_endpoint("/scan"), Some(false));
    }
}
