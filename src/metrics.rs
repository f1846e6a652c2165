// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for registry-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `registry_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `master`: remote master name
//! - `kind`: publication, subscription, service
//! - `operation`: register, unregister
//! - `status` / `outcome`: success, failure, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a reconciliation pass
pub fn record_pass(master: &str, outcome: &str) {
    counter!(
        "registry_sync_passes_total",
        "master" => master.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record reconciliation pass latency
pub fn record_pass_latency(master: &str, duration: Duration) {
    histogram!(
        "registry_sync_pass_seconds",
        "master" => master.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one applied registry mutation
pub fn record_registration(kind: &str, operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "registry_sync_registrations_total",
        "kind" => kind.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record batch size
pub fn record_batch_size(master: &str, count: usize) {
    histogram!(
        "registry_sync_batch_size",
        "master" => master.to_string()
    )
    .record(count as f64);
}

/// Set number of registrations currently mirrored from a master
pub fn set_mirrored(master: &str, count: usize) {
    gauge!(
        "registry_sync_mirrored_registrations",
        "master" => master.to_string()
    )
    .set(count as f64);
}

/// Set number of live sessions
pub fn set_active_sessions(count: usize) {
    gauge!("registry_sync_active_sessions").set(count as f64);
}

/// Set session state (0 = Idle, 1 = Pending, 2 = Syncing, 3 = BackoffWait, 4 = Stopped)
pub fn set_session_state(master: &str, state: u8) {
    gauge!(
        "registry_sync_session_state",
        "master" => master.to_string()
    )
    .set(state as f64);
}

/// Record a failed pass by error kind
pub fn record_error(master: &str, kind: &str) {
    counter!(
        "registry_sync_errors_total",
        "master" => master.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a change notification, accepted or ignored as unchanged
pub fn record_notification(master: &str, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "ignored" };
    counter!(
        "registry_sync_notifications_total",
        "master" => master.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record how long a burst was debounced before its pass started
pub fn record_debounce_wait(duration: Duration) {
    histogram!("registry_sync_debounce_wait_seconds").record(duration.as_secs_f64());
}

/// Record subscriber priming outcome
pub fn record_prime(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("registry_sync_subscriber_primes_total", "status" => status).increment(1);
}

/// Record teardown outcome
pub fn record_teardown(master: &str, outcome: &str, retracted: usize) {
    counter!(
        "registry_sync_teardowns_total",
        "master" => master.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    counter!("registry_sync_retracted_total").increment(retracted as u64);
}

/// A timing guard that records pass latency on drop
pub struct LatencyTimer {
    master: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_pass_latency(&self.master, self.start.elapsed());
    }
}
