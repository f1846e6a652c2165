// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Owns one [`SyncSession`] per remote master.
//!
//! Discovery drives the supervisor: new or changed masters go through
//! [`SyncSupervisor::on_descriptor_update`], vanished ones through
//! [`SyncSupervisor::on_descriptor_lost`]. A session's errors never
//! surface here.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::client::{RegistryClient, XmlRpcRegistryClient};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::registration::RemoteMasterDescriptor;
use crate::session::{SessionState, SyncMasterInfo, SyncSession};
use crate::snapshot::RegistrySnapshot;

pub struct SyncSupervisor {
    config: Arc<SyncConfig>,
    client: Arc<dyn RegistryClient>,
    sessions: DashMap<String, Arc<SyncSession>>,
    local_snapshot: RwLock<Option<Arc<RegistrySnapshot>>>,
    /// Serializes session creation so one name never gets two workers.
    creating: Mutex<()>,
}

impl SyncSupervisor {
    pub fn new(config: SyncConfig, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            config: Arc::new(config),
            client,
            sessions: DashMap::new(),
            local_snapshot: RwLock::new(None),
            creating: Mutex::new(()),
        }
    }

    /// Supervisor talking XML-RPC to real masters.
    pub fn connect(config: SyncConfig) -> Self {
        let client = Arc::new(XmlRpcRegistryClient::new(&config));
        Self::new(config, client)
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Create a session for an unseen master, or forward the notification.
    ///
    /// The filter is loaded before any lock is taken, so a slow interface
    /// document never holds up other masters.
    #[instrument(skip(self, descriptor), fields(master = %descriptor.name, timestamp = descriptor.timestamp))]
    pub async fn on_descriptor_update(&self, descriptor: RemoteMasterDescriptor) -> Result<(), SyncError> {
        if let Some(session) = self.session(&descriptor.name) {
            session.request_update(descriptor);
            return Ok(());
        }

        let filter = SyncSession::load_filter(&descriptor, &self.config).await?;

        let _guard = self.creating.lock();
        if let Some(session) = self.session(&descriptor.name) {
            session.request_update(descriptor);
            return Ok(());
        }

        let name = descriptor.name.clone();
        let seed = self.local_snapshot.read().clone();
        let session = Arc::new(SyncSession::with_filter(
            descriptor,
            self.config.clone(),
            self.client.clone(),
            filter,
            seed.clone(),
        ));
        self.sessions.insert(name.clone(), session.clone());

        // a broadcast between reading the seed and the insert missed this session
        let current = self.local_snapshot.read().clone();
        if let Some(current) = current {
            if !seed.is_some_and(|seed| Arc::ptr_eq(&seed, &current)) {
                debug!(master = %name, "Local state changed during session creation, forwarding");
                session.set_own_master_state(current);
            }
        }

        metrics::set_active_sessions(self.sessions.len());
        info!(master = %name, sessions = self.sessions.len(), "Created sync session");
        Ok(())
    }

    /// Broadcast the local master's state to every session.
    ///
    /// Skipped when equivalent to the previous broadcast.
    #[instrument(skip(self, snapshot), fields(timestamp_local = snapshot.timestamp_local))]
    pub fn on_local_state_changed(&self, snapshot: RegistrySnapshot) {
        let snapshot = {
            let mut current = self.local_snapshot.write();
            if current.as_ref().is_some_and(|c| c.is_equivalent(&snapshot)) {
                debug!("Local state unchanged, not broadcasting");
                return;
            }
            let snapshot = Arc::new(snapshot);
            *current = Some(snapshot.clone());
            snapshot
        };
        for entry in self.sessions.iter() {
            entry.value().set_own_master_state(snapshot.clone());
        }
    }

    /// Stop and remove the session for `name`, awaiting its teardown.
    ///
    /// Returns false if no such session existed.
    #[instrument(skip(self))]
    pub async fn on_descriptor_lost(&self, name: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(name) else {
            debug!("No session to remove");
            return false;
        };
        session.stop().await;
        metrics::set_active_sessions(self.sessions.len());
        info!(sessions = self.sessions.len(), "Removed sync session");
        true
    }

    /// Per remote master, what is currently mirrored. Sorted by name.
    #[must_use]
    pub fn describe_all(&self) -> Vec<SyncMasterInfo> {
        let mut infos: Vec<SyncMasterInfo> = self.sessions.iter().map(|e| e.value().info()).collect();
        infos.sort_by(|a, b| a.master_name.cmp(&b.master_name));
        infos
    }

    #[must_use]
    pub fn session_state(&self, name: &str) -> Option<SessionState> {
        self.sessions.get(name).map(|s| s.state())
    }

    /// Shared handle to the session for `name`.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<Arc<SyncSession>> {
        self.sessions.get(name).map(|s| s.value().clone())
    }

    #[must_use]
    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let names = self.session_names();
        info!(sessions = names.len(), "Shutting down sync sessions");
        for name in names {
            if let Some((_, session)) = self.sessions.remove(&name) {
                session.stop().await;
            }
        }
        metrics::set_active_sessions(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryRegistry;
    use crate::registration::Registration;
    use std::time::Duration;

    const LOCAL: &str = "http://local:11311/";

    fn descriptor(host: &str, timestamp: f64) -> RemoteMasterDescriptor {
        RemoteMasterDescriptor::new(
            host,
            format!("http://{}:11311/", host),
            "/master_discovery",
            format!("http://{}:11611/", host),
            timestamp,
        )
    }

    fn remote(host: &str, topic: &str) -> RegistrySnapshot {
        let master = format!("http://{}:11311/", host);
        let mut s = RegistrySnapshot::new(master.clone(), None);
        s.add_publisher(topic, "/driver");
        s.set_topic_type(topic, "std/String");
        s.set_node("/driver", Some(&format!("http://{}:40000/", host)), &master, None);
        s
    }

    fn supervisor(registry: Arc<InMemoryRegistry>) -> SyncSupervisor {
        SyncSupervisor::new(
            SyncConfig {
                local_master_uri: LOCAL.into(),
                ..Default::default()
            },
            registry,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_per_master() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        registry.set_remote("http://beta:11611/", remote("beta", "/b"));
        let sup = supervisor(registry.clone());

        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        sup.on_descriptor_update(descriptor("beta", 1.0)).await.unwrap();
        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        settle().await;

        assert_eq!(sup.session_names(), vec!["alpha".to_string(), "beta".to_string()]);
        let infos = sup.describe_all();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].publishers[0].topic, "/a");
        assert_eq!(infos[1].publishers[0].topic, "/b");
        assert_eq!(sup.session_state("alpha"), Some(SessionState::Idle));

        sup.shutdown().await;
        assert!(sup.is_empty());
        assert!(registry.registered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_master_is_torn_down() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        let sup = supervisor(registry.clone());

        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        settle().await;
        assert_eq!(registry.registered().len(), 1);

        assert!(sup.on_descriptor_lost("alpha").await);
        assert!(!sup.on_descriptor_lost("alpha").await);
        assert!(registry.registered().is_empty());
        assert_eq!(sup.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_state_suppresses_locally_satisfied_topics() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        let sup = supervisor(registry.clone());

        // a local node already publishes /a
        let mut local = RegistrySnapshot::new(LOCAL, None);
        local.add_publisher("/a", "/local_driver");
        local.set_topic_type("/a", "std/String");
        local.set_node("/local_driver", Some("http://local:40000/"), LOCAL, None);
        local.timestamp_local = 1.0;
        sup.on_local_state_changed(local.clone());

        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        settle().await;
        assert!(registry.registered().is_empty());

        // the local publisher goes away
        let mut gone = RegistrySnapshot::new(LOCAL, None);
        gone.timestamp_local = 2.0;
        sup.on_local_state_changed(gone);
        settle().await;
        assert!(registry.registered().contains(&Registration::publication(
            "/a",
            "std/String",
            "/driver",
            "http://alpha:40000/"
        )));
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_equivalent_local_state_is_not_rebroadcast() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        let sup = supervisor(registry.clone());
        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        settle().await;

        let mut local = RegistrySnapshot::new(LOCAL, None);
        local.timestamp_local = 1.0;
        sup.on_local_state_changed(local.clone());
        settle().await;
        let fetches = registry.fetch_times().len();

        local.timestamp_local = 5.0;
        sup.on_local_state_changed(local);
        settle().await;
        assert_eq!(registry.fetch_times().len(), fetches);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_interface_document_uses_defaults() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        let sup = SyncSupervisor::new(
            SyncConfig {
                local_master_uri: LOCAL.into(),
                interface_url: Some("/nonexistent/interface.yaml".into()),
                ..Default::default()
            },
            registry.clone(),
        );

        sup.on_descriptor_update(descriptor("alpha", 1.0)).await.unwrap();
        settle().await;
        assert_eq!(sup.len(), 1);
        assert_eq!(registry.registered().len(), 1);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_state_racing_session_creation_reaches_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interface.yaml");
        std::fs::write(&path, "ignore_services: []\n").unwrap();

        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        registry.set_remote("http://alpha:11611/", remote("alpha", "/a"));
        let sup = SyncSupervisor::new(
            SyncConfig {
                local_master_uri: LOCAL.into(),
                interface_url: Some(path.display().to_string()),
                ..Default::default()
            },
            registry.clone(),
        );

        let mut local = RegistrySnapshot::new(LOCAL, None);
        local.add_publisher("/a", "/local_driver");
        local.set_topic_type("/a", "std/String");
        local.set_node("/local_driver", Some("http://local:40000/"), LOCAL, None);
        local.timestamp_local = 1.0;

        let (created, _) = tokio::join!(sup.on_descriptor_update(descriptor("alpha", 1.0)), async {
            tokio::task::yield_now().await;
            sup.on_local_state_changed(local.clone());
        });
        created.unwrap();
        settle().await;

        assert!(registry.registered().is_empty(), "/a is already served locally");
        sup.shutdown().await;
    }

    /// Accepts connections and never answers.
    async fn stalled_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}/interface.yaml", addr)
    }

    #[tokio::test]
    async fn test_stalled_interface_server_does_not_serialize_masters() {
        let registry = Arc::new(InMemoryRegistry::new(LOCAL));
        let sup = SyncSupervisor::new(
            SyncConfig {
                local_master_uri: LOCAL.into(),
                interface_url: Some(stalled_server().await),
                fetch_timeout_secs: 1,
                ..Default::default()
            },
            registry,
        );

        let started = std::time::Instant::now();
        let (alpha, beta) = tokio::join!(
            sup.on_descriptor_update(descriptor("alpha", 1.0)),
            sup.on_descriptor_update(descriptor("beta", 1.0)),
        );
        assert!(matches!(alpha, Err(SyncError::Configuration(_))));
        assert!(matches!(beta, Err(SyncError::Configuration(_))));
        // both loads time out side by side, not one after the other
        assert!(started.elapsed() < Duration::from_millis(1900));
        assert!(sup.is_empty());
    }
}
