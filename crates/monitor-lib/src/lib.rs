//! Batch monitoring library
//!
//! This crate provides the core functionality for:
//! - Pulling running batch snapshots from an external source
//! - Append-only snapshot history with window queries
//! - Stuck and throughput trend detection
//! - Deduplicated alerting and per-cycle reporting
//! - Health checks and observability

pub mod detection;
pub mod health;
pub mod history;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod service;
pub mod source;
pub mod statistics;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use service::MonitorService;
