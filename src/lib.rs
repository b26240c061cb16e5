//! SDS CSI Controller
//!
//! The Controller Service of a CSI plugin for an OpenSDS-style block
//! storage orchestrator. Volume, snapshot and attachment requests are
//! reconciled idempotently against the orchestrator, which owns all state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    REST API (axum)  /  Metrics                        │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                        Controller Service                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌───────────┐  │
//! │  │ Provisioning │  │ Replication  │  │  Attachment  │  │  Listing  │  │
//! │  │  Reconciler  │◄─┤ Orchestrator │◄─┤  Reconciler  │  │  Engine   │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └───────────┘  │
//! │         └─────────────────┼─────────────────┘                         │
//! │                 ┌─────────┴──────────┐                                │
//! │                 │ OrchestratorClient │                                │
//! │                 └─────────┬──────────┘                                │
//! ├───────────────────────────┼──────────────────────────────────────────┤
//! │        ┌──────────────────┴───────────────────┐                       │
//! │        │   OpenSDS (reqwest)  │  In-memory    │                       │
//! │        └──────────────────────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Controller Service, reconcilers, backends and API
//! - [`domain`]: Backend records and the orchestrator client port
//! - [`error`]: Error types and status codes

pub mod controlplane;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, ControllerConfig,
    ControllerMetrics, ControllerService, InMemoryConfig, InMemoryOrchestrator, OpenSdsClient,
    OpenSdsConfig,
};

pub use controlplane::node_id::NodeIdentity;

pub use domain::ports::{
    AttachmentRecord, OrchestratorClient, OrchestratorClientRef, PoolRecord, ProfileRecord,
    ReplicationRecord, SnapshotRecord, VolumeRecord,
};

pub use error::{Error, ErrorCode, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
