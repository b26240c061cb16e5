//! API Module
//!
//! REST surface for the Controller Service and the server that runs it.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
