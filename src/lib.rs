//! # Registry Sync
//!
//! Mirrors registrations between independent runtime registries ("masters")
//! so that endpoints registered on different hosts can find each other as
//! if they shared one master.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Discovery                            │
//! │  • (name, uri, discoverer, status uri, timestamp) tuples    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SyncSupervisor                         │
//! │  • One session per remote master                            │
//! │  • Broadcasts local master state                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncSession                          │
//! │  • Debounce bursts of notifications                         │
//! │  • Fetch snapshot → filter → diff → one ordered batch       │
//! │  • Backoff on failure, retract everything on stop           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RegistryClient                         │
//! │  • XML-RPC (masterInfo, system.multicall)                   │
//! │  • In-memory registry for tests and demos                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use registry_sync::{RemoteMasterDescriptor, SyncConfig, SyncSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), registry_sync::SyncError> {
//!     let config = SyncConfig {
//!         local_master_uri: "http://localhost:11311/".into(),
//!         interface_url: Some("/etc/registry-sync/interface.yaml".into()),
//!         ..Default::default()
//!     };
//!     let supervisor = SyncSupervisor::connect(config);
//!
//!     // Fed by discovery
//!     supervisor
//!         .on_descriptor_update(RemoteMasterDescriptor::new(
//!             "robot1",
//!             "http://robot1:11311/",
//!             "/master_discovery",
//!             "http://robot1:11611/",
//!             1700000000.0,
//!         ))
//!         .await?;
//!
//!     for info in supervisor.describe_all() {
//!         println!("{}: {} registrations", info.master_name, info.len());
//!     }
//!
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`supervisor`]: The [`SyncSupervisor`] owning all sessions
//! - [`session`]: Per-master worker, debounce and reconciliation
//! - [`client`]: Registry client trait and its backends
//! - [`filter`]: Sync/ignore pattern lists
//! - [`snapshot`]: Registration snapshot of one master
//! - [`rpc`]: Minimal XML-RPC transport
//! - [`resilience`]: Retry logic

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod registration;
pub mod resilience;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod supervisor;

pub use client::{ApplyOutcome, InMemoryRegistry, RegistryClient, RegistryOp, XmlRpcRegistryClient};
pub use config::SyncConfig;
pub use error::SyncError;
pub use filter::{FilterDefaults, InterfaceDocument, PatternFilter};
pub use metrics::LatencyTimer;
pub use registration::{EndpointIdentity, Registration, RegistrationKind, RemoteMasterDescriptor};
pub use resilience::retry::RetryConfig;
pub use session::{SessionState, SyncMasterInfo, SyncSession};
pub use snapshot::RegistrySnapshot;
pub use supervisor::SyncSupervisor;
