// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the synchronization engine.
//!
//! Everything that can go wrong during a reconciliation pass is absorbed
//! inside the owning session and only surfaces as tracing events and
//! metrics. The single exception is [`SyncError::Configuration`], which is
//! returned from session construction.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Remote or local registry unreachable, timed out, or answered with a fault.
    #[error("transport error: {0}")]
    Transport(String),

    /// The snapshot payload did not have the expected shape.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// A single item inside an otherwise successful batch was rejected.
    #[error("{operation} rejected with code {code}: {message}")]
    PartialApply {
        operation: String,
        code: i32,
        message: String,
    },

    /// Invalid filter configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Whether this error moves a session into backoff and gets retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::MalformedSnapshot(_))
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::MalformedSnapshot(_) => "malformed_snapshot",
            Self::PartialApply { .. } => "partial_apply",
            Self::Configuration(_) => "configuration",
        }
    }
}
