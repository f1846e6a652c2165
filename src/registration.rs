// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registration identity types.
//!
//! A [`Registration`] is identified by its full tuple. When an endpoint
//! restarts under the same name its URI changes, which yields a different
//! registration and therefore a re-sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named endpoint and, if it is currently live, its URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointIdentity {
    pub name: String,
    pub uri: Option<String>,
}

impl EndpointIdentity {
    pub fn new(name: impl Into<String>, uri: Option<String>) -> Self {
        Self { name: name.into(), uri }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.uri.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// One entry of a master's registration table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Registration {
    Publication {
        topic: String,
        topic_type: String,
        node: String,
        node_uri: String,
    },
    Subscription {
        topic: String,
        topic_type: String,
        node: String,
        node_uri: String,
    },
    ServiceProvision {
        service: String,
        service_uri: String,
        node: String,
        node_uri: String,
    },
}

/// Discriminant of [`Registration`], used for metrics labels and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationKind {
    Publication,
    Subscription,
    ServiceProvision,
}

impl RegistrationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publication => "publication",
            Self::Subscription => "subscription",
            Self::ServiceProvision => "service",
        }
    }
}

impl Registration {
    pub fn publication(
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        node: impl Into<String>,
        node_uri: impl Into<String>,
    ) -> Self {
        Self::Publication {
            topic: topic.into(),
            topic_type: topic_type.into(),
            node: node.into(),
            node_uri: node_uri.into(),
        }
    }

    pub fn subscription(
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        node: impl Into<String>,
        node_uri: impl Into<String>,
    ) -> Self {
        Self::Subscription {
            topic: topic.into(),
            topic_type: topic_type.into(),
            node: node.into(),
            node_uri: node_uri.into(),
        }
    }

    pub fn service(
        service: impl Into<String>,
        service_uri: impl Into<String>,
        node: impl Into<String>,
        node_uri: impl Into<String>,
    ) -> Self {
        Self::ServiceProvision {
            service: service.into(),
            service_uri: service_uri.into(),
            node: node.into(),
            node_uri: node_uri.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> RegistrationKind {
        match self {
            Self::Publication { .. } => RegistrationKind::Publication,
            Self::Subscription { .. } => RegistrationKind::Subscription,
            Self::ServiceProvision { .. } => RegistrationKind::ServiceProvision,
        }
    }

    /// Topic or service name.
    #[must_use]
    pub fn resource(&self) -> &str {
        match self {
            Self::Publication { topic, .. } | Self::Subscription { topic, .. } => topic,
            Self::ServiceProvision { service, .. } => service,
        }
    }

    #[must_use]
    pub fn node(&self) -> &str {
        match self {
            Self::Publication { node, .. }
            | Self::Subscription { node, .. }
            | Self::ServiceProvision { node, .. } => node,
        }
    }

    #[must_use]
    pub fn node_uri(&self) -> &str {
        match self {
            Self::Publication { node_uri, .. }
            | Self::Subscription { node_uri, .. }
            | Self::ServiceProvision { node_uri, .. } => node_uri,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointIdentity {
        EndpointIdentity::new(self.node(), Some(self.node_uri().to_string()))
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publication { topic, topic_type, node, node_uri } => {
                write!(f, "pub {} [{}] by {} ({})", topic, topic_type, node, node_uri)
            }
            Self::Subscription { topic, topic_type, node, node_uri } => {
                write!(f, "sub {} [{}] by {} ({})", topic, topic_type, node, node_uri)
            }
            Self::ServiceProvision { service, service_uri, node, node_uri } => {
                write!(f, "srv {} at {} by {} ({})", service, service_uri, node, node_uri)
            }
        }
    }
}

/// Identity record of a remote master as reported by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMasterDescriptor {
    pub name: String,
    pub uri: String,
    pub discoverer_name: String,
    pub status_uri: String,
    /// The remote master's own state-change counter, not a sync time.
    pub timestamp: f64,
}

impl RemoteMasterDescriptor {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        discoverer_name: impl Into<String>,
        status_uri: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            discoverer_name: discoverer_name.into(),
            status_uri: status_uri.into(),
            timestamp,
        }
    }

    /// True when `other` reports a different remote state than `self`.
    #[must_use]
    pub fn state_changed(&self, other: &RemoteMasterDescriptor) -> bool {
        self.timestamp.to_bits() != other.timestamp.to_bits()
    }
}
