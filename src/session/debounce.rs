// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Congestion avoidance for bursts of change notifications.
//!
//! A burst opens a window. The pass fires once the burst has been quiet for
//! `quiet`, or once `max_wait` has passed since the burst began, whichever
//! comes first. The ceiling is checked first so a steady trickle of
//! notifications cannot postpone a pass forever.
//!
//! Between checks the worker sleeps a random slice of `jitter` so that many
//! sessions woken by the same event spread their fetches out.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub quiet: Duration,
    pub max_wait: Duration,
    pub jitter: Duration,
}

impl DebouncePolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            quiet: config.debounce_quiet(),
            max_wait: config.debounce_max_wait(),
            jitter: config.debounce_jitter(),
        }
    }

    /// Uniform sample from `[0, jitter)`.
    #[must_use]
    pub fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..millis.max(1)))
    }
}

/// What the worker should do next while a burst is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Fire,
    Sleep(Duration),
}

/// Start and most recent notification of the current burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CongestionWindow {
    first: Option<Instant>,
    last: Option<Instant>,
}

impl CongestionWindow {
    /// Fold a notification sent at `at` in. Order of arrival does not matter.
    pub fn note(&mut self, at: Instant) {
        self.first = Some(self.first.map_or(at, |first| first.min(at)));
        self.last = Some(self.last.map_or(at, |last| last.max(at)));
    }

    pub fn clear(&mut self) {
        self.first = None;
        self.last = None;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.first.is_some()
    }

    #[must_use]
    pub fn first(&self) -> Option<Instant> {
        self.first
    }

    /// Decide whether to fire now, or how long to sleep before re-checking.
    ///
    /// `jitter` is the random sleep candidate; it is clamped so the ceiling
    /// is never overshot. A zero candidate sleeps until the nearer deadline.
    #[must_use]
    pub fn poll(&self, now: Instant, policy: &DebouncePolicy, jitter: Duration) -> Wake {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return Wake::Fire;
        };
        let since_first = now.saturating_duration_since(first);
        if since_first >= policy.max_wait {
            return Wake::Fire;
        }
        let since_last = now.saturating_duration_since(last);
        if since_last >= policy.quiet {
            return Wake::Fire;
        }

        let until_ceiling = policy.max_wait - since_first;
        let candidate = if jitter.is_zero() {
            policy.quiet - since_last
        } else {
            jitter
        };
        Wake::Sleep(candidate.min(until_ceiling))
    }
}
