//! Batch monitor daemon
//!
//! Wires the monitoring library to its runtime collaborators: environment
//! configuration, the webhook alert sink and the HTTP operations API.

pub mod api;
pub mod config;
pub mod sinks;
