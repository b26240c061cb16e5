//! Controller Control Plane
//!
//! The Controller Service and the reconcilers behind it, plus the backend
//! adapters they drive and the REST surface in front of them.

pub mod api;
pub mod attachment;
pub mod backends;
pub mod listing;
pub mod metrics;
pub mod node_id;
pub mod protocol;
pub mod provisioning;
pub mod replication;
pub mod service;

pub use api::*;
pub use backends::*;
pub use metrics::ControllerMetrics;
pub use service::{ControllerConfig, ControllerService};
