// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pure reconciliation steps: desired set, diff, and folding batch results
//! back into the mirrored set.

use std::collections::BTreeSet;

use crate::client::{ApplyOutcome, RegistryOp};
use crate::error::SyncError;
use crate::filter::PatternFilter;
use crate::registration::Registration;
use crate::snapshot::{same_uri, NodeInfo, RegistrySnapshot};

/// URI of `node` if it is live and owned by the remote master (and not
/// by the local master).
fn mirrorable_node<'a>(remote: &'a RegistrySnapshot, node: &str, local_master_uri: &str) -> Option<&'a NodeInfo> {
    let info = remote.node(node)?;
    let uri = info.uri.as_deref()?;
    if uri.is_empty()
        || !same_uri(&info.master_uri, remote.master_uri())
        || same_uri(&info.master_uri, local_master_uri)
    {
        return None;
    }
    Some(info)
}

/// Registrations of `remote` that should exist in the local registry.
pub fn desired_registrations(
    remote: &RegistrySnapshot,
    local: Option<&RegistrySnapshot>,
    filter: &PatternFilter,
    local_master_uri: &str,
) -> BTreeSet<Registration> {
    let mut desired = BTreeSet::new();
    if same_uri(remote.master_uri(), local_master_uri) {
        return desired;
    }

    for topic in remote.topics() {
        let Some(topic_type) = topic.topic_type.as_deref() else {
            continue;
        };
        let endpoints = topic
            .publishers
            .iter()
            .map(|n| (n, true))
            .chain(topic.subscribers.iter().map(|n| (n, false)));
        for (node, publishes) in endpoints {
            let Some(info) = mirrorable_node(remote, node, local_master_uri) else {
                continue;
            };
            if !filter.should_mirror(node, &topic.name, local) {
                continue;
            }
            let node_uri = info.uri.clone().unwrap_or_default();
            desired.insert(if publishes {
                Registration::publication(&topic.name, topic_type, node, node_uri)
            } else {
                Registration::subscription(&topic.name, topic_type, node, node_uri)
            });
        }
    }

    for service in remote.services() {
        let Some(service_uri) = service.uri.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        if !same_uri(&service.master_uri, remote.master_uri()) || same_uri(&service.master_uri, local_master_uri) {
            continue;
        }
        for node in &service.providers {
            let Some(info) = mirrorable_node(remote, node, local_master_uri) else {
                continue;
            };
            if !filter.should_mirror_service(node, &service.name, local) {
                continue;
            }
            desired.insert(Registration::service(
                &service.name,
                service_uri,
                node,
                info.uri.clone().unwrap_or_default(),
            ));
        }
    }

    desired
}

/// Minimal change set between what is mirrored and what is desired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub to_remove: Vec<Registration>,
    pub to_add: Vec<Registration>,
}

impl Plan {
    pub fn between(mirrored: &BTreeSet<Registration>, desired: &BTreeSet<Registration>) -> Self {
        Self {
            to_remove: mirrored.difference(desired).cloned().collect(),
            to_add: desired.difference(mirrored).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_remove.len() + self.to_add.len()
    }

    /// The batch: every removal, then every addition.
    #[must_use]
    pub fn ops(&self) -> Vec<RegistryOp> {
        self.to_remove
            .iter()
            .cloned()
            .map(RegistryOp::Unregister)
            .chain(self.to_add.iter().cloned().map(RegistryOp::Register))
            .collect()
    }

    /// Mirrored set after the batch failed as a whole: removals are dropped,
    /// nothing is added.
    #[must_use]
    pub fn retract(&self, mirrored: &BTreeSet<Registration>) -> BTreeSet<Registration> {
        let mut after = mirrored.clone();
        for registration in &self.to_remove {
            after.remove(registration);
        }
        after
    }
}

/// Result of folding a batch's outcomes into the mirrored set.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub mirrored: BTreeSet<Registration>,
    pub added: usize,
    pub removed: usize,
    /// Rejected items with the op that caused them.
    pub rejected: Vec<(RegistryOp, SyncError)>,
    /// `(topic, type)` of new subscriptions the registry already has publishers for.
    pub to_prime: Vec<(String, String)>,
}

/// Fold per-item outcomes in. `outcomes` must line up with `plan.ops()`.
pub fn apply_outcomes(
    mirrored: &BTreeSet<Registration>,
    plan: &Plan,
    outcomes: &[ApplyOutcome],
) -> Result<ApplyReport, SyncError> {
    let ops = plan.ops();
    if ops.len() != outcomes.len() {
        return Err(SyncError::Transport(format!(
            "batch returned {} results for {} operations",
            outcomes.len(),
            ops.len()
        )));
    }

    let mut report = ApplyReport {
        mirrored: plan.retract(mirrored),
        ..Default::default()
    };
    for (op, outcome) in ops.into_iter().zip(outcomes) {
        if !outcome.is_success() {
            report.rejected.push((op.clone(), outcome.to_error(&op)));
            continue;
        }
        match op {
            RegistryOp::Unregister(_) => report.removed += 1,
            RegistryOp::Register(registration) => {
                if let Registration::Subscription { topic, topic_type, .. } = &registration {
                    if outcome.payload.as_array().is_some_and(|p| !p.is_empty()) {
                        report.to_prime.push((topic.clone(), topic_type.clone()));
                    }
                }
                report.mirrored.insert(registration);
                report.added += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterDefaults, InterfaceDocument};
    use crate::rpc::Value;

    const LOCAL: &str = "http://local:11311/";
    const REMOTE: &str = "http://remote:11311/";

    fn filter() -> PatternFilter {
        PatternFilter::with_defaults(&FilterDefaults {
            own_node_name: "/master_sync".into(),
            discoverer_name: "/master_discovery".into(),
        })
        .unwrap()
    }

    fn remote() -> RegistrySnapshot {
        let mut s = RegistrySnapshot::new(REMOTE, None);
        s.add_publisher("/scan", "/lidar");
        s.set_topic_type("/scan", "sensor/Scan");
        s.add_subscriber("/cmd_vel", "/base");
        s.set_topic_type("/cmd_vel", "geo/Twist");
        s.set_node("/lidar", Some("http://remote:40001/"), REMOTE, Some(1));
        s.set_node("/base", Some("http://remote:40002/"), REMOTE, Some(2));
        s.add_service_provider("/lidar/set_parameters", "/lidar");
        s.set_service("/lidar/set_parameters", Some("rosrpc://remote:40003"), REMOTE, None);
        s
    }

    fn scan_pub() -> Registration {
        Registration::publication("/scan", "sensor/Scan", "/lidar", "http://remote:40001/")
    }

    #[test]
    fn test_desired_from_remote() {
        let desired = desired_registrations(&remote(), None, &filter(), LOCAL);
        assert_eq!(desired.len(), 3);
        assert!(desired.contains(&scan_pub()));
        assert!(desired.contains(&Registration::subscription(
            "/cmd_vel",
            "geo/Twist",
            "/base",
            "http://remote:40002/"
        )));
        assert!(desired.contains(&Registration::service(
            "/lidar/set_parameters",
            "rosrpc://remote:40003",
            "/lidar",
            "http://remote:40001/"
        )));
    }

    #[test]
    fn test_no_relaying_or_self_mirroring() {
        let mut s = remote();
        // mirrored into the remote master from a third master
        s.add_publisher("/gps", "/gps_driver");
        s.set_topic_type("/gps", "nav/Fix");
        s.set_node("/gps_driver", Some("http://third:1/"), "http://third:11311/", None);
        // mirrored into the remote master from us
        s.add_publisher("/chatter", "/talker");
        s.set_topic_type("/chatter", "std/String");
        s.set_node("/talker", Some("http://local:2/"), LOCAL, None);

        let desired = desired_registrations(&s, None, &filter(), LOCAL);
        assert!(desired.iter().all(|r| r.node() != "/gps_driver" && r.node() != "/talker"));

        // a session pointed at ourselves mirrors nothing
        let own = RegistrySnapshot::new(LOCAL, None);
        assert!(desired_registrations(&own, None, &filter(), LOCAL).is_empty());
    }

    #[test]
    fn test_unresolvable_entries_are_skipped() {
        let mut s = RegistrySnapshot::new(REMOTE, None);
        // no type
        s.add_publisher("/raw", "/lidar");
        s.set_node("/lidar", Some("http://remote:40001/"), REMOTE, None);
        // node without uri
        s.add_publisher("/scan", "/ghost");
        s.set_topic_type("/scan", "sensor/Scan");
        // service without uri
        s.add_service_provider("/srv", "/lidar");
        assert!(desired_registrations(&s, None, &filter(), LOCAL).is_empty());
    }

    #[test]
    fn test_filter_applies() {
        let doc = InterfaceDocument {
            ignore_nodes: Some(vec!["/lidar".into()]),
            ..Default::default()
        };
        let filter = PatternFilter::compile(&doc, &FilterDefaults::default()).unwrap();
        let desired = desired_registrations(&remote(), None, &filter, LOCAL);
        assert_eq!(desired.len(), 1);
        assert!(desired.iter().all(|r| r.node() == "/base"));
    }

    #[test]
    fn test_plan_orders_removals_first() {
        let old = Registration::publication("/old", "std/String", "/lidar", "http://remote:40001/");
        let mirrored: BTreeSet<_> = [old.clone()].into_iter().collect();
        let desired: BTreeSet<_> = [scan_pub()].into_iter().collect();
        let plan = Plan::between(&mirrored, &desired);
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.ops(),
            vec![RegistryOp::Unregister(old), RegistryOp::Register(scan_pub())]
        );
        assert!(Plan::between(&desired, &desired).is_empty());
    }

    #[test]
    fn test_apply_outcomes_keeps_failed_items_out() {
        let old = Registration::publication("/old", "std/String", "/lidar", "http://remote:40001/");
        let sub = Registration::subscription("/cmd_vel", "geo/Twist", "/base", "http://remote:40002/");
        let mirrored: BTreeSet<_> = [old].into_iter().collect();
        let desired: BTreeSet<_> = [scan_pub(), sub.clone()].into_iter().collect();
        let plan = Plan::between(&mirrored, &desired);

        // publications order before subscriptions
        assert_eq!(plan.ops()[2], RegistryOp::Register(sub.clone()));
        // removal rejected, scan rejected, subscription accepted with publishers
        let outcomes = vec![
            ApplyOutcome::failure(0, "unknown"),
            ApplyOutcome::failure(-1, "denied"),
            ApplyOutcome::success(Value::Array(vec![Value::from("http://local:1/")])),
        ];

        let report = apply_outcomes(&mirrored, &plan, &outcomes).unwrap();
        assert_eq!(report.mirrored, [sub].into_iter().collect());
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.to_prime, vec![("/cmd_vel".to_string(), "geo/Twist".to_string())]);
    }

    #[test]
    fn test_apply_outcomes_count_mismatch() {
        let desired: BTreeSet<_> = [scan_pub()].into_iter().collect();
        let plan = Plan::between(&BTreeSet::new(), &desired);
        assert!(matches!(
            apply_outcomes(&BTreeSet::new(), &plan, &[]),
            Err(SyncError::Transport(_))
        ));
    }

    #[test]
    fn test_retract_after_batch_failure() {
        let old = Registration::publication("/old", "std/String", "/lidar", "http://remote:40001/");
        let mirrored: BTreeSet<_> = [old, scan_pub()].into_iter().collect();
        let desired: BTreeSet<_> = [scan_pub()].into_iter().collect();
        let plan = Plan::between(&mirrored, &desired);
        assert_eq!(plan.retract(&mirrored), desired);
    }
}
