// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registration snapshot of one master.
//!
//! The snapshot is an arena keyed by name: nodes, topics and services only
//! reference each other by name, never by ownership. This keeps the model
//! free of cycles and lets equality and diffing work on plain key sets.
//!
//! # Example
//!
//! ```
//! use registry_sync::RegistrySnapshot;
//!
//! let mut snapshot = RegistrySnapshot::new("http://robot1:11311/", None);
//! snapshot.add_publisher("/scan", "/lidar");
//! snapshot.set_topic_type("/scan", "sensor/Scan");
//! snapshot.set_node("/lidar", Some("http://robot1:40001/"), "http://robot1:11311/", Some(4242));
//!
//! assert_eq!(snapshot.master_name(), "robot1");
//! assert!(snapshot.node("/lidar").unwrap().local);
//! assert_eq!(snapshot.topic_has_local_endpoint("/scan"), Some(true));
//! ```

mod wire;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Default port of a master; other ports show up in the derived master name.
pub const DEFAULT_MASTER_PORT: u16 = 11311;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub uri: Option<String>,
    /// Master the node originally registered with.
    pub master_uri: String,
    pub pid: Option<i64>,
    pub local: bool,
    pub published_topics: BTreeSet<String>,
    pub subscribed_topics: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub topic_type: Option<String>,
    pub publishers: BTreeSet<String>,
    pub subscribers: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub uri: Option<String>,
    pub master_uri: String,
    pub service_type: Option<String>,
    pub local: bool,
    pub providers: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    master_uri: String,
    master_name: String,
    /// State-change counter of the master.
    pub timestamp: f64,
    /// Counter covering only the master's own (non-mirrored) registrations.
    pub timestamp_local: f64,
    nodes: BTreeMap<String, NodeInfo>,
    topics: BTreeMap<String, TopicInfo>,
    services: BTreeMap<String, ServiceInfo>,
}

impl RegistrySnapshot {
    /// Create an empty snapshot. Without a name, one is derived from the URI.
    pub fn new(master_uri: impl Into<String>, master_name: Option<String>) -> Self {
        let master_uri = master_uri.into();
        let master_name = master_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| master_name_from_uri(&master_uri));
        Self {
            master_uri,
            master_name,
            timestamp: 0.0,
            timestamp_local: 0.0,
            nodes: BTreeMap::new(),
            topics: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    #[must_use]
    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&TopicInfo> {
        self.topics.get(name)
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn topics(&self) -> impl Iterator<Item = &TopicInfo> {
        self.topics.values()
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceInfo> {
        self.services.values()
    }

    fn ensure_node(&mut self, name: &str) -> &mut NodeInfo {
        let master_uri = self.master_uri.clone();
        self.nodes.entry(name.to_string()).or_insert_with(|| NodeInfo {
            name: name.to_string(),
            uri: None,
            master_uri,
            pid: None,
            local: false,
            published_topics: BTreeSet::new(),
            subscribed_topics: BTreeSet::new(),
            services: BTreeSet::new(),
        })
    }

    fn ensure_topic(&mut self, name: &str) -> &mut TopicInfo {
        self.topics.entry(name.to_string()).or_insert_with(|| TopicInfo {
            name: name.to_string(),
            topic_type: None,
            publishers: BTreeSet::new(),
            subscribers: BTreeSet::new(),
        })
    }

    fn ensure_service(&mut self, name: &str) -> &mut ServiceInfo {
        let master_uri = self.master_uri.clone();
        self.services.entry(name.to_string()).or_insert_with(|| ServiceInfo {
            name: name.to_string(),
            uri: None,
            master_uri,
            service_type: None,
            local: false,
            providers: BTreeSet::new(),
        })
    }

    pub fn add_publisher(&mut self, topic: &str, node: &str) {
        if topic.is_empty() || node.is_empty() {
            return;
        }
        self.ensure_topic(topic).publishers.insert(node.to_string());
        self.ensure_node(node).published_topics.insert(topic.to_string());
    }

    pub fn add_subscriber(&mut self, topic: &str, node: &str) {
        if topic.is_empty() || node.is_empty() {
            return;
        }
        self.ensure_topic(topic).subscribers.insert(node.to_string());
        self.ensure_node(node).subscribed_topics.insert(topic.to_string());
    }

    pub fn add_service_provider(&mut self, service: &str, node: &str) {
        if service.is_empty() || node.is_empty() {
            return;
        }
        self.ensure_service(service).providers.insert(node.to_string());
        self.ensure_node(node).services.insert(service.to_string());
    }

    pub fn set_topic_type(&mut self, topic: &str, topic_type: &str) {
        if topic.is_empty() {
            return;
        }
        let entry = self.ensure_topic(topic);
        entry.topic_type = (!topic_type.is_empty()).then(|| topic_type.to_string());
    }

    /// Record where a node lives. Locality is derived here.
    pub fn set_node(&mut self, name: &str, uri: Option<&str>, master_uri: &str, pid: Option<i64>) {
        if name.is_empty() {
            return;
        }
        let local = uri.is_some_and(|u| is_local(master_uri, &self.master_uri, u));
        let node = self.ensure_node(name);
        node.uri = uri.filter(|u| !u.is_empty()).map(str::to_string);
        node.master_uri = master_uri.to_string();
        node.pid = pid;
        node.local = local;
    }

    /// Record where a service lives. Locality is derived here.
    pub fn set_service(&mut self, name: &str, uri: Option<&str>, master_uri: &str, service_type: Option<&str>) {
        if name.is_empty() {
            return;
        }
        let local = uri.is_some_and(|u| is_local(master_uri, &self.master_uri, u));
        let service = self.ensure_service(name);
        service.uri = uri.filter(|u| !u.is_empty()).map(str::to_string);
        service.master_uri = master_uri.to_string();
        service.service_type = service_type.filter(|t| !t.is_empty()).map(str::to_string);
        service.local = local;
    }

    /// Whether any publisher or subscriber of `topic` runs on this machine.
    ///
    /// `None` when the topic is not registered at all.
    #[must_use]
    pub fn topic_has_local_endpoint(&self, topic: &str) -> Option<bool> {
        let info = self.topics.get(topic)?;
        Some(
            info.publishers
                .iter()
                .chain(info.subscribers.iter())
                .any(|n| self.nodes.get(n).is_some_and(|node| node.local)),
        )
    }

    /// Whether `service` is provided by a node running on this machine.
    ///
    /// `None` when the service is not registered at all.
    #[must_use]
    pub fn service_has_local_provider(&self, service: &str) -> Option<bool> {
        let info = self.services.get(service)?;
        Some(
            info.local
                || info
                    .providers
                    .iter()
                    .any(|n| self.nodes.get(n).is_some_and(|node| node.local)),
        )
    }

    /// State equality ignoring both timestamps.
    #[must_use]
    pub fn is_equivalent(&self, other: &RegistrySnapshot) -> bool {
        self.master_uri == other.master_uri
            && self.nodes == other.nodes
            && self.topics == other.topics
            && self.services == other.services
    }
}

/// Hostname of a master URI, suffixed with `--<port>` for non-default ports.
#[must_use]
pub fn master_name_from_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_string();
            match parsed.port() {
                Some(port) if port != DEFAULT_MASTER_PORT => format!("{}--{}", host, port),
                _ => host,
            }
        }
        Err(_) => uri.to_string(),
    }
}

/// Host part of a URI, if it parses.
#[must_use]
pub fn host_of(uri: &str) -> Option<String> {
    url::Url::parse(uri).ok()?.host_str().map(str::to_string)
}

/// URI comparison tolerant to a trailing slash.
#[must_use]
pub fn same_uri(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// An endpoint is local when it was registered with this snapshot's master
/// and runs on that master's host.
fn is_local(owner_master_uri: &str, snapshot_master_uri: &str, endpoint_uri: &str) -> bool {
    if !same_uri(owner_master_uri, snapshot_master_uri) {
        return false;
    }
    match (host_of(owner_master_uri), host_of(endpoint_uri)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
