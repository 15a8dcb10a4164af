//! Pod failure monitor library
//!
//! This crate provides the core functionality for:
//! - Mirroring pod state from the Kubernetes watch API
//! - Classifying pods into known-bad states
//! - Detecting healthy to bad transitions
//! - Suppressing repeat alerts per pod within a window
//! - Dispatching alerts to the analysis service
//! - Health checks and observability

pub mod classifier;
pub mod controller;
pub mod detector;
pub mod dispatcher;
pub mod health;
pub mod models;
pub mod observability;
pub mod suppression;
pub mod watcher;

pub use classifier::classify;
pub use controller::{CandidateOutcome, PodController};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse, SyncInfo,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
