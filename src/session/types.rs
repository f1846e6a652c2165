use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::registration::{Registration, RemoteMasterDescriptor};
use crate::snapshot::RegistrySnapshot;

/// Session lifecycle state.
///
/// ```text
/// Idle ──update──► Pending ──debounce──► Syncing ──ok──► Idle
///                     ▲                     │
///                     └──── BackoffWait ◄───┘ failure
///
/// any ──stop──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pending,
    Syncing,
    BackoffWait,
    Stopped,
}

impl SessionState {
    /// Numeric value for the state gauge.
    #[must_use]
    pub fn as_gauge(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Pending => 1,
            Self::Syncing => 2,
            Self::BackoffWait => 3,
            Self::Stopped => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Pending => write!(f, "Pending"),
            Self::Syncing => write!(f, "Syncing"),
            Self::BackoffWait => write!(f, "BackoffWait"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Messages from session handles to the worker task.
///
/// `at` is when the caller sent the notification, so a burst that queues
/// up behind a running pass is timed from its real start.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Update { descriptor: RemoteMasterDescriptor, at: Instant },
    OwnState { snapshot: Arc<RegistrySnapshot>, at: Instant },
    Stop,
}

/// A mirrored topic endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SyncTopicInfo {
    pub topic: String,
    pub topic_type: String,
    pub node: String,
    pub node_uri: String,
}

/// A mirrored service provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SyncServiceInfo {
    pub service: String,
    pub service_uri: String,
    pub node: String,
    pub node_uri: String,
}

/// What one session currently mirrors, grouped by node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMasterInfo {
    pub master_name: String,
    pub master_uri: String,
    /// Mirrored node name to node URI.
    pub nodes: BTreeMap<String, String>,
    pub publishers: Vec<SyncTopicInfo>,
    pub subscribers: Vec<SyncTopicInfo>,
    pub services: Vec<SyncServiceInfo>,
    /// Remote stamp of the last successful pass, `0.0` when none.
    pub last_synced_timestamp: f64,
}

impl SyncMasterInfo {
    pub fn from_mirrored(
        descriptor: &RemoteMasterDescriptor,
        mirrored: &BTreeSet<Registration>,
        last_synced_timestamp: f64,
    ) -> Self {
        let mut info = Self {
            master_name: descriptor.name.clone(),
            master_uri: descriptor.uri.clone(),
            last_synced_timestamp,
            ..Default::default()
        };
        for registration in mirrored {
            info.nodes
                .insert(registration.node().to_string(), registration.node_uri().to_string());
            match registration {
                Registration::Publication { topic, topic_type, node, node_uri } => {
                    info.publishers.push(SyncTopicInfo {
                        topic: topic.clone(),
                        topic_type: topic_type.clone(),
                        node: node.clone(),
                        node_uri: node_uri.clone(),
                    })
                }
                Registration::Subscription { topic, topic_type, node, node_uri } => {
                    info.subscribers.push(SyncTopicInfo {
                        topic: topic.clone(),
                        topic_type: topic_type.clone(),
                        node: node.clone(),
                        node_uri: node_uri.clone(),
                    })
                }
                Registration::ServiceProvision { service, service_uri, node, node_uri } => {
                    info.services.push(SyncServiceInfo {
                        service: service.clone(),
                        service_uri: service_uri.clone(),
                        node: node.clone(),
                        node_uri: node_uri.clone(),
                    })
                }
            }
        }
        info
    }

    /// Number of mirrored registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publishers.len() + self.subscribers.len() + self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
