//! Core library for the management agent
//!
//! This crate provides the runtime that supervises pluggable resource
//! components and exposes their capabilities through narrow, time-bounded,
//! interruptible calls:
//! - Facet traits plugin components implement
//! - Per-resource containers with lock/timeout proxy machinery
//! - Adaptive, coalescing availability checking with scan/report loop
//! - Bundle deployment: destination resolution, package staging, status
//!   reporting
//! - Health checks and Prometheus metrics

pub mod bundle;
pub mod error;
pub mod facet;
pub mod health;
pub mod invocation;
pub mod inventory;
pub mod measurement;
pub mod models;
pub mod observability;
pub mod server;

pub use error::{BundleError, FacetError, FacetResult};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use invocation::InvocationContext;
pub use models::*;
