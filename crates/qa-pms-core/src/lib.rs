//! # QA PMS Core
//!
//! Shared integration-health types and traits used across the QA Intelligent PMS
//! framework.
//!
//! This crate provides:
//! - Health check types and traits for integration monitoring

pub mod health;

pub use health::{HealthCheck, HealthCheckResult, HealthStatus, IntegrationHealth};
