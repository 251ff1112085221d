//! # QA PMS Config
//!
//! Anomaly detection engine configuration, loaded from environment variables.
//!
//! This crate provides:
//! - Environment variable loading via `dotenvy`
//! - Cross-field validated configuration for the engine's detectors, queue,
//!   profile EWMA alphas, rate limiter, and summarizer

pub mod engine;

pub use engine::EngineSettings;
