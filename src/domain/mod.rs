//! Domain layer - Backend records and port definitions
//!
//! This module defines the orchestrator client port that backend adapters
//! implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
