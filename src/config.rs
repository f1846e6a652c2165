//! Configuration for the registry synchronizer.
//!
//! # Example
//!
//! ```
//! use registry_sync::SyncConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.debounce_quiet(), Duration::from_millis(1100));
//!
//! // Full config
//! let config = SyncConfig {
//!     local_master_uri: "http://robot1:11311/".into(),
//!     interface_url: Some("/etc/sync/interface.yaml".into()),
//!     backoff_ms: 1000,
//!     ..Default::default()
//! };
//! assert_eq!(config.backoff(), Duration::from_secs(1));
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration shared by every sync session.
///
/// All fields have sensible defaults. At minimum, you should configure
/// `local_master_uri` for production use.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// URI of the local master that receives mirrored registrations
    #[serde(default = "default_local_master_uri")]
    pub local_master_uri: String,

    /// Name of the synchronizer node itself (excluded from mirroring)
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API URI advertised for the synchronizer's own throwaway publications
    #[serde(default = "default_node_api_uri")]
    pub node_api_uri: String,

    /// Location of the sync/ignore interface document (path, file:// or http(s)://)
    #[serde(default)]
    pub interface_url: Option<String>,

    /// Trailing quiet period before a pending update fires
    #[serde(default = "default_debounce_quiet_ms")]
    pub debounce_quiet_ms: u64,

    /// Hard ceiling measured from the first request of a burst
    #[serde(default = "default_debounce_max_wait_ms")]
    pub debounce_max_wait_ms: u64,

    /// Upper bound of the randomized re-check interval
    #[serde(default = "default_debounce_jitter_ms")]
    pub debounce_jitter_ms: u64,

    /// Delay after a failed pass before debouncing again
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Timeout for pulling a remote snapshot
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Timeout for the batched calls against the local master
    #[serde(default = "default_apply_timeout_secs")]
    pub apply_timeout_secs: u64,

    /// Timeout for the final unregistration batch on teardown
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,
}

fn default_local_master_uri() -> String { "http://localhost:11311/".to_string() }
fn default_node_name() -> String { "/master_sync".to_string() }
fn default_node_api_uri() -> String { "http://localhost:11612/".to_string() }
fn default_debounce_quiet_ms() -> u64 { 1100 }
fn default_debounce_max_wait_ms() -> u64 { 5000 }
fn default_debounce_jitter_ms() -> u64 { 2000 }
fn default_backoff_ms() -> u64 { 3000 }
fn default_fetch_timeout_secs() -> u64 { 20 }
fn default_apply_timeout_secs() -> u64 { 3 }
fn default_teardown_timeout_secs() -> u64 { 5 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_master_uri: default_local_master_uri(),
            node_name: default_node_name(),
            node_api_uri: default_node_api_uri(),
            interface_url: None,
            debounce_quiet_ms: default_debounce_quiet_ms(),
            debounce_max_wait_ms: default_debounce_max_wait_ms(),
            debounce_jitter_ms: default_debounce_jitter_ms(),
            backoff_ms: default_backoff_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            apply_timeout_secs: default_apply_timeout_secs(),
            teardown_timeout_secs: default_teardown_timeout_secs(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn debounce_quiet(&self) -> Duration {
        Duration::from_millis(self.debounce_quiet_ms)
    }

    #[must_use]
    pub fn debounce_max_wait(&self) -> Duration {
        Duration::from_millis(self.debounce_max_wait_ms)
    }

    #[must_use]
    pub fn debounce_jitter(&self) -> Duration {
        Duration::from_millis(self.debounce_jitter_ms)
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    #[must_use]
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}
