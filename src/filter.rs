// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync/ignore pattern filter.
//!
//! Decides per registration whether it should be mirrored. Precedence:
//! explicit ignore, explicit sync, locality against the local snapshot,
//! then the no-configuration default.
//!
//! # Interface document
//!
//! ```yaml
//! ignore_nodes: [/rosout, /*camera*]
//! sync_topics: [/scan, /tf*]
//! ```
//!
//! Every key is optional. Patterns are globs: `*` matches any run of
//! characters (including `/`), `?` matches a single character.

use regex::RegexSet;
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::snapshot::RegistrySnapshot;

/// Raw sync/ignore lists. `None` means the key was absent.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct InterfaceDocument {
    #[serde(default)]
    pub ignore_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub sync_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub ignore_topics: Option<Vec<String>>,
    #[serde(default)]
    pub sync_topics: Option<Vec<String>>,
    #[serde(default)]
    pub ignore_services: Option<Vec<String>>,
    #[serde(default)]
    pub sync_services: Option<Vec<String>>,
}

impl InterfaceDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self, SyncError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: Option<Self> = serde_yaml::from_str(text)
            .map_err(|e| SyncError::Configuration(format!("invalid interface document: {}", e)))?;
        Ok(doc.unwrap_or_default())
    }

    /// Load from a plain path, a `file://` URL or an `http(s)://` URL.
    ///
    /// A document that does not exist yields the defaults. Anything else
    /// that keeps it from being read, including `timeout`, is a
    /// configuration error.
    pub async fn load(location: &str, timeout: Duration) -> Result<Self, SyncError> {
        let text = if location.starts_with("http://") || location.starts_with("https://") {
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| SyncError::Configuration(format!("cannot build HTTP client: {}", e)))?;
            let response = http
                .get(location)
                .send()
                .await
                .map_err(|e| SyncError::Configuration(format!("cannot fetch {}: {}", location, e)))?;
            if response.status() == StatusCode::NOT_FOUND {
                warn!(location, "Interface document not found, using defaults");
                return Ok(Self::default());
            }
            if !response.status().is_success() {
                return Err(SyncError::Configuration(format!(
                    "cannot fetch {}: {}",
                    location,
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| SyncError::Configuration(format!("cannot read {}: {}", location, e)))?
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            match tokio::fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(location, "Interface document not found, using defaults");
                    return Ok(Self::default());
                }
                Err(e) => return Err(SyncError::Configuration(format!("cannot read {}: {}", path, e))),
            }
        };
        info!(location, "Loaded interface document");
        Self::from_yaml_str(&text)
    }
}

/// Names the default ignore lists are built from.
#[derive(Debug, Clone, Default)]
pub struct FilterDefaults {
    /// The synchronizer's own node name.
    pub own_node_name: String,
    /// The discovery node of the remote master.
    pub discoverer_name: String,
}

impl FilterDefaults {
    fn ignore_nodes(&self) -> Vec<String> {
        let mut patterns = vec!["/rosout".to_string()];
        for name in [&self.own_node_name, &self.discoverer_name] {
            if !name.is_empty() {
                patterns.push(widen_node_name(name));
            }
        }
        patterns.push("/*node_manager".to_string());
        patterns.push("/*zeroconf".to_string());
        patterns
    }

    fn ignore_topics() -> Vec<String> {
        vec!["/rosout".to_string(), "/rosout_agg".to_string()]
    }
}

/// `/ns/name` becomes `/*ns/*name*` so that any namespaced instance matches.
fn widen_node_name(name: &str) -> String {
    format!("{}*", name.replace('/', "/*"))
}

/// Convert a glob into an anchored whole-string regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

/// One compiled list.
#[derive(Debug, Clone)]
pub struct Matcher {
    patterns: Vec<String>,
    set: Option<RegexSet>,
}

impl Matcher {
    pub fn compile(key: &str, globs: &[String]) -> Result<Self, SyncError> {
        let patterns: Vec<String> = globs
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        let set = if patterns.is_empty() {
            None
        } else {
            let regexes: Vec<String> = patterns.iter().map(|g| glob_to_regex(g)).collect();
            Some(RegexSet::new(&regexes).map_err(|e| {
                SyncError::Configuration(format!("invalid pattern in {}: {}", key, e))
            })?)
        };
        Ok(Self { patterns, set })
    }

    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.set.as_ref().is_some_and(|set| set.is_match(name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_none()
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Why a registration is or is not mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    IgnoredNode,
    IgnoredResource,
    SyncedNode,
    SyncedResource,
    /// Already served by an endpoint on this machine.
    SatisfiedLocally,
    /// Local snapshot known, nothing local uses the resource.
    NotLocal,
    /// No sync lists configured and no local snapshot.
    Default,
    /// Sync lists configured, none matched, no local snapshot.
    NotListed,
}

impl Decision {
    #[must_use]
    pub fn mirrors(&self) -> bool {
        matches!(
            self,
            Self::SyncedNode | Self::SyncedResource | Self::NotLocal | Self::Default
        )
    }
}

/// Compiled sync/ignore lists for nodes, topics and services.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    ignore_nodes: Matcher,
    sync_nodes: Matcher,
    ignore_topics: Matcher,
    sync_topics: Matcher,
    ignore_services: Matcher,
    sync_services: Matcher,
}

impl PatternFilter {
    /// Compile the document, falling back to defaults for absent keys.
    pub fn compile(doc: &InterfaceDocument, defaults: &FilterDefaults) -> Result<Self, SyncError> {
        let pick = |list: &Option<Vec<String>>, fallback: Vec<String>| list.clone().unwrap_or(fallback);
        let filter = Self {
            ignore_nodes: Matcher::compile("ignore_nodes", &pick(&doc.ignore_nodes, defaults.ignore_nodes()))?,
            sync_nodes: Matcher::compile("sync_nodes", &pick(&doc.sync_nodes, Vec::new()))?,
            ignore_topics: Matcher::compile("ignore_topics", &pick(&doc.ignore_topics, FilterDefaults::ignore_topics()))?,
            sync_topics: Matcher::compile("sync_topics", &pick(&doc.sync_topics, Vec::new()))?,
            ignore_services: Matcher::compile("ignore_services", &pick(&doc.ignore_services, Vec::new()))?,
            sync_services: Matcher::compile("sync_services", &pick(&doc.sync_services, Vec::new()))?,
        };
        debug!(
            ignore_nodes = ?filter.ignore_nodes.patterns(),
            sync_nodes = ?filter.sync_nodes.patterns(),
            ignore_topics = ?filter.ignore_topics.patterns(),
            sync_topics = ?filter.sync_topics.patterns(),
            "Compiled pattern filter"
        );
        Ok(filter)
    }

    /// Filter built from defaults only.
    pub fn with_defaults(defaults: &FilterDefaults) -> Result<Self, SyncError> {
        Self::compile(&InterfaceDocument::default(), defaults)
    }

    /// Load the interface document (if any) and compile it.
    pub async fn load(
        interface_url: Option<&str>,
        defaults: &FilterDefaults,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let doc = match interface_url.filter(|u| !u.is_empty()) {
            Some(url) => InterfaceDocument::load(url, timeout).await?,
            None => InterfaceDocument::default(),
        };
        Self::compile(&doc, defaults)
    }

    pub fn decide_topic(&self, node: &str, topic: &str, local: Option<&RegistrySnapshot>) -> Decision {
        self.decide(
            node,
            topic,
            &self.ignore_topics,
            &self.sync_topics,
            local.map(|s| s.topic_has_local_endpoint(topic)),
        )
    }

    pub fn decide_service(&self, node: &str, service: &str, local: Option<&RegistrySnapshot>) -> Decision {
        self.decide(
            node,
            service,
            &self.ignore_services,
            &self.sync_services,
            local.map(|s| s.service_has_local_provider(service)),
        )
    }

    #[must_use]
    pub fn should_mirror(&self, node: &str, topic: &str, local: Option<&RegistrySnapshot>) -> bool {
        self.decide_topic(node, topic, local).mirrors()
    }

    #[must_use]
    pub fn should_mirror_service(&self, node: &str, service: &str, local: Option<&RegistrySnapshot>) -> bool {
        self.decide_service(node, service, local).mirrors()
    }

    /// `local_use` is `None` without a local snapshot, `Some(None)` when the
    /// resource is not registered locally.
    fn decide(
        &self,
        node: &str,
        resource: &str,
        ignore: &Matcher,
        sync: &Matcher,
        local_use: Option<Option<bool>>,
    ) -> Decision {
        if self.ignore_nodes.is_match(node) {
            return Decision::IgnoredNode;
        }
        if ignore.is_match(resource) {
            return Decision::IgnoredResource;
        }
        if self.sync_nodes.is_match(node) {
            return Decision::SyncedNode;
        }
        if sync.is_match(resource) {
            return Decision::SyncedResource;
        }
        match local_use {
            Some(Some(true)) => Decision::SatisfiedLocally,
            Some(_) => Decision::NotLocal,
            None if self.sync_nodes.is_empty() && sync.is_empty() => Decision::Default,
            None => Decision::NotListed,
        }
    }
}
