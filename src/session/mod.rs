// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-remote-master synchronization session.
//!
//! A [`SyncSession`] is a handle to a worker task that keeps the local
//! registry's mirror of one remote master up to date:
//!
//! 1. a change notification opens a debounce window
//! 2. once the window closes, the remote snapshot is fetched
//! 3. the desired registrations are diffed against what is mirrored
//! 4. removals then additions are applied as one batch
//!
//! Failures never reach the caller. The session backs off and retries, and
//! reports through tracing and metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use registry_sync::{InMemoryRegistry, RemoteMasterDescriptor, SyncConfig, SyncSession};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), registry_sync::SyncError> {
//! let registry = Arc::new(InMemoryRegistry::new("http://localhost:11311/"));
//! let descriptor = RemoteMasterDescriptor::new(
//!     "robot1",
//!     "http://robot1:11311/",
//!     "/master_discovery",
//!     "http://robot1:11611/",
//!     1.0,
//! );
//!
//! let session = SyncSession::spawn(descriptor, Arc::new(SyncConfig::default()), registry, None).await?;
//! println!("{}", session.state());
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

mod debounce;
mod reconcile;
mod types;
mod worker;

pub use debounce::{CongestionWindow, DebouncePolicy, Wake};
pub use reconcile::{apply_outcomes, desired_registrations, ApplyReport, Plan};
pub use types::{SessionCommand, SessionState, SyncMasterInfo, SyncServiceInfo, SyncTopicInfo};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::client::RegistryClient;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::filter::{FilterDefaults, PatternFilter};
use crate::registration::RemoteMasterDescriptor;
use crate::snapshot::RegistrySnapshot;
use worker::Worker;

/// Handle to a running session. Dropping it without [`SyncSession::stop`]
/// still stops the worker and retracts its registrations, but nobody waits
/// for that to finish.
pub struct SyncSession {
    name: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
    info_rx: watch::Receiver<SyncMasterInfo>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Load the filter from `config.interface_url` and start the worker.
    ///
    /// Fails only with [`SyncError::Configuration`].
    pub async fn spawn(
        descriptor: RemoteMasterDescriptor,
        config: Arc<SyncConfig>,
        client: Arc<dyn RegistryClient>,
        local_snapshot: Option<Arc<RegistrySnapshot>>,
    ) -> Result<Self, SyncError> {
        let filter = Self::load_filter(&descriptor, &config).await?;
        Ok(Self::with_filter(descriptor, config, client, filter, local_snapshot))
    }

    /// Compile the filter a session for `descriptor` would use.
    ///
    /// Fetching the document is bounded by `config.fetch_timeout()`.
    #[instrument(skip(descriptor, config), fields(master = %descriptor.name))]
    pub async fn load_filter(descriptor: &RemoteMasterDescriptor, config: &SyncConfig) -> Result<PatternFilter, SyncError> {
        let defaults = FilterDefaults {
            own_node_name: config.node_name.clone(),
            discoverer_name: descriptor.discoverer_name.clone(),
        };
        PatternFilter::load(config.interface_url.as_deref(), &defaults, config.fetch_timeout())
            .await
            .map_err(|e| {
                error!(error = %e, "Invalid filter configuration, session not created");
                e
            })
    }

    /// Start the worker with an already compiled filter.
    pub fn with_filter(
        descriptor: RemoteMasterDescriptor,
        config: Arc<SyncConfig>,
        client: Arc<dyn RegistryClient>,
        filter: PatternFilter,
        local_snapshot: Option<Arc<RegistrySnapshot>>,
    ) -> Self {
        let name = descriptor.name.clone();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (worker, state_rx, info_rx) = Worker::new(descriptor, config, client, filter, local_snapshot, receiver);
        let handle = tokio::spawn(worker.run());
        Self {
            name,
            commands,
            state_rx,
            info_rx,
            handle: Mutex::new(Some(handle)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The remote master reported a state change.
    pub fn request_update(&self, descriptor: RemoteMasterDescriptor) {
        self.send(SessionCommand::Update {
            descriptor,
            at: Instant::now(),
        });
    }

    /// The local master's state changed; re-evaluate locality.
    pub fn set_own_master_state(&self, snapshot: Arc<RegistrySnapshot>) {
        self.send(SessionCommand::OwnState {
            snapshot,
            at: Instant::now(),
        });
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            debug!(master = %self.name, "Session already stopped, command dropped");
        }
    }

    /// Stop the worker and wait for its teardown to finish.
    ///
    /// A pass in flight completes first. Calling this twice is harmless.
    pub async fn stop(&self) {
        self.send(SessionCommand::Stop);
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(master = %self.name, error = %e, "Session worker ended abnormally");
                }
            }
            None => {
                let mut state = self.state_rx.clone();
                let _ = state.wait_for(|s| *s == SessionState::Stopped).await;
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// What this session currently mirrors.
    #[must_use]
    pub fn info(&self) -> SyncMasterInfo {
        self.info_rx.borrow().clone()
    }

    #[must_use]
    pub fn info_receiver(&self) -> watch::Receiver<SyncMasterInfo> {
        self.info_rx.clone()
    }
}
