// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-session worker task.
//!
//! All session state lives here and is touched by this task only. Handles
//! talk to it through [`SessionCommand`]s; observers read the state and
//! info watch channels.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use super::debounce::{CongestionWindow, DebouncePolicy, Wake};
use super::reconcile::{apply_outcomes, desired_registrations, Plan};
use super::types::{SessionCommand, SessionState, SyncMasterInfo};
use crate::client::{RegistryClient, RegistryOp};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::filter::PatternFilter;
use crate::metrics::{self, LatencyTimer};
use crate::registration::{Registration, RemoteMasterDescriptor};
use crate::resilience::retry::{retry, RetryConfig};
use crate::snapshot::RegistrySnapshot;

pub(super) struct Worker {
    descriptor: RemoteMasterDescriptor,
    config: Arc<SyncConfig>,
    client: Arc<dyn RegistryClient>,
    filter: PatternFilter,
    policy: DebouncePolicy,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state_tx: watch::Sender<SessionState>,
    info_tx: watch::Sender<SyncMasterInfo>,
    mirrored: BTreeSet<Registration>,
    local_snapshot: Option<Arc<RegistrySnapshot>>,
    last_synced_timestamp: f64,
    window: CongestionWindow,
    pending: bool,
    stopped: bool,
}

fn operation_label(op: &RegistryOp) -> &'static str {
    if op.is_register() {
        "register"
    } else {
        "unregister"
    }
}

impl Worker {
    pub(super) fn new(
        descriptor: RemoteMasterDescriptor,
        config: Arc<SyncConfig>,
        client: Arc<dyn RegistryClient>,
        filter: PatternFilter,
        local_snapshot: Option<Arc<RegistrySnapshot>>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> (Self, watch::Receiver<SessionState>, watch::Receiver<SyncMasterInfo>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Pending);
        let (info_tx, info_rx) = watch::channel(SyncMasterInfo::from_mirrored(&descriptor, &BTreeSet::new(), 0.0));
        let worker = Self {
            policy: DebouncePolicy::from_config(&config),
            descriptor,
            config,
            client,
            filter,
            commands,
            state_tx,
            info_tx,
            mirrored: BTreeSet::new(),
            local_snapshot,
            last_synced_timestamp: 0.0,
            window: CongestionWindow::default(),
            pending: true,
            stopped: false,
        };
        (worker, state_rx, info_rx)
    }

    pub(super) async fn run(mut self) {
        info!(master = %self.descriptor.name, uri = %self.descriptor.uri, "Sync session started");
        // first pass runs right away, later ones are debounced
        let mut due = true;

        while !self.stopped {
            if !self.pending {
                self.set_state(SessionState::Idle);
                match self.commands.recv().await {
                    Some(command) => self.handle(command),
                    None => self.stopped = true,
                }
                continue;
            }

            if !due {
                self.set_state(SessionState::Pending);
                self.debounce().await;
                if self.stopped {
                    break;
                }
            }

            self.set_state(SessionState::Syncing);
            self.pending = false;
            self.window.clear();
            due = false;

            if let Err(err) = self.pass().await {
                self.last_synced_timestamp = 0.0;
                warn!(master = %self.descriptor.name, error = %err, "Sync pass failed, backing off");
                metrics::record_pass(&self.descriptor.name, "failure");
                metrics::record_error(&self.descriptor.name, err.kind());
                self.set_state(SessionState::BackoffWait);
                self.backoff().await;
                // retry through the debounce; an empty window fires at once
                self.pending = true;
            }
            self.drain_commands();
        }

        self.teardown().await;
        self.set_state(SessionState::Stopped);
        info!(master = %self.descriptor.name, "Sync session stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Update { descriptor, at } => {
                let accepted = descriptor.state_changed(&self.descriptor)
                    || descriptor.status_uri != self.descriptor.status_uri;
                metrics::record_notification(&self.descriptor.name, accepted);
                if !accepted {
                    debug!(master = %self.descriptor.name, timestamp = descriptor.timestamp, "Ignoring unchanged notification");
                    return;
                }
                debug!(
                    master = %self.descriptor.name,
                    from = self.descriptor.timestamp,
                    to = descriptor.timestamp,
                    "Remote state changed"
                );
                self.descriptor = descriptor;
                self.last_synced_timestamp = 0.0;
                self.mark_pending(at);
            }
            SessionCommand::OwnState { snapshot, at } => {
                let unchanged = self
                    .local_snapshot
                    .as_ref()
                    .is_some_and(|s| s.timestamp_local.to_bits() == snapshot.timestamp_local.to_bits());
                if unchanged {
                    debug!(master = %self.descriptor.name, "Ignoring unchanged local state");
                    return;
                }
                self.local_snapshot = Some(snapshot);
                self.mark_pending(at);
            }
            SessionCommand::Stop => {
                debug!(master = %self.descriptor.name, "Stop requested");
                self.stopped = true;
            }
        }
    }

    fn mark_pending(&mut self, at: Instant) {
        self.pending = true;
        self.window.note(at);
    }

    /// Fold in commands that queued up while a pass was running.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command);
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(master = %self.descriptor.name, from = %previous, to = %state, "Session state changed");
            metrics::set_session_state(&self.descriptor.name, state.as_gauge());
        }
    }

    fn publish_info(&self) {
        self.info_tx.send_replace(SyncMasterInfo::from_mirrored(
            &self.descriptor,
            &self.mirrored,
            self.last_synced_timestamp,
        ));
        metrics::set_mirrored(&self.descriptor.name, self.mirrored.len());
    }

    /// Wait until the burst is quiet or the ceiling is reached.
    async fn debounce(&mut self) {
        let started = self.window.first().unwrap_or_else(Instant::now);
        loop {
            let wake = self
                .window
                .poll(Instant::now(), &self.policy, self.policy.sample_jitter());
            let Wake::Sleep(delay) = wake else {
                break;
            };
            tokio::select! {
                _ = sleep(delay) => {}
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => self.stopped = true,
                },
            }
            if self.stopped {
                return;
            }
        }
        let waited = started.elapsed();
        debug!(master = %self.descriptor.name, waited_ms = waited.as_millis() as u64, "Debounce elapsed");
        metrics::record_debounce_wait(waited);
    }

    async fn backoff(&mut self) {
        let deadline = Instant::now() + self.config.backoff();
        while !self.stopped {
            tokio::select! {
                _ = sleep_until(deadline) => return,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => self.stopped = true,
                },
            }
        }
    }

    /// One fetch, diff, apply cycle.
    #[instrument(skip(self), fields(master = %self.descriptor.name))]
    async fn pass(&mut self) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new(self.descriptor.name.as_str());
        let remote = self
            .client
            .fetch_snapshot(&self.descriptor.status_uri, self.config.fetch_timeout())
            .await?;

        let desired = desired_registrations(
            &remote,
            self.local_snapshot.as_deref(),
            &self.filter,
            &self.config.local_master_uri,
        );
        let plan = Plan::between(&self.mirrored, &desired);
        if plan.is_empty() {
            debug!(mirrored = self.mirrored.len(), "Already in sync");
        } else {
            self.apply(&plan).await?;
        }

        self.last_synced_timestamp = remote.timestamp;
        self.publish_info();
        metrics::record_pass(&self.descriptor.name, "success");
        Ok(())
    }

    async fn apply(&mut self, plan: &Plan) -> Result<(), SyncError> {
        let ops = plan.ops();
        metrics::record_batch_size(&self.descriptor.name, ops.len());

        let result = self
            .client
            .apply_batch(&ops, self.config.apply_timeout())
            .await
            .and_then(|outcomes| apply_outcomes(&self.mirrored, plan, &outcomes));
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                // nothing is known about the items; stop claiming the removals
                self.mirrored = plan.retract(&self.mirrored);
                self.publish_info();
                return Err(err);
            }
        };

        for (op, err) in &report.rejected {
            warn!(registration = %op.registration(), error = %err, "Registry rejected operation");
            metrics::record_registration(op.registration().kind().as_str(), operation_label(op), false);
        }
        for registration in &plan.to_add {
            if report.mirrored.contains(registration) {
                info!(registration = %registration, "Mirrored registration");
                metrics::record_registration(registration.kind().as_str(), "register", true);
            }
        }
        for registration in &plan.to_remove {
            let op = RegistryOp::Unregister(registration.clone());
            if !report.rejected.iter().any(|(rejected, _)| *rejected == op) {
                info!(registration = %registration, "Retracted registration");
                metrics::record_registration(registration.kind().as_str(), "unregister", true);
            }
        }
        info!(
            added = report.added,
            removed = report.removed,
            rejected = report.rejected.len(),
            mirrored = report.mirrored.len(),
            "Applied registry batch"
        );
        self.mirrored = report.mirrored;

        for (topic, topic_type) in &report.to_prime {
            match self
                .client
                .prime_subscriber_notification(topic, topic_type, self.config.apply_timeout())
                .await
            {
                Ok(()) => {
                    debug!(topic = %topic, "Primed publisher update for new subscriber");
                    metrics::record_prime(true);
                }
                Err(err) => {
                    warn!(topic = %topic, error = %err, "Could not prime subscriber");
                    metrics::record_prime(false);
                }
            }
        }
        Ok(())
    }

    /// Retract everything mirrored. Best effort: failures are logged only.
    #[instrument(skip(self), fields(master = %self.descriptor.name, mirrored = self.mirrored.len()))]
    async fn teardown(&mut self) {
        if self.mirrored.is_empty() {
            metrics::record_teardown(&self.descriptor.name, "empty", 0);
            return;
        }
        let ops: Vec<RegistryOp> = self.mirrored.iter().cloned().map(RegistryOp::Unregister).collect();
        let client = &self.client;
        let batch = &ops;
        let timeout = self.config.teardown_timeout();
        let result = retry("teardown", &RetryConfig::teardown(), move || client.apply_batch(batch, timeout)).await;

        match result {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                let retracted = ops.len().saturating_sub(failed);
                if failed > 0 {
                    warn!(failed, "Registry refused to retract some registrations");
                }
                info!(retracted, "Retracted mirrored registrations");
                metrics::record_teardown(&self.descriptor.name, "success", retracted);
            }
            Err(err) => {
                warn!(error = %err, count = ops.len(), "Teardown failed, mirrored registrations may linger");
                metrics::record_teardown(&self.descriptor.name, "failure", 0);
            }
        }
        self.mirrored.clear();
        self.publish_info();
    }
}
