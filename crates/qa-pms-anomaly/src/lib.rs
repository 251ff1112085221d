//! GitHub activity anomaly detection engine.
//!
//! Ingests a stream of GitHub events, scores them across behavioral,
//! content, temporal, and repository-context dimensions, composes a final
//! severity via [`scoring::severity_engine::SeverityEngine`], and publishes
//! the result onto a Redis-backed severity-ranked priority queue.

pub mod detectors;
pub mod error;
pub mod math;
pub mod profiles;
pub mod queue;
pub mod rate_limit;
pub mod scoring;
pub mod store;
pub mod stream_processor;
pub mod summarizer;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use stream_processor::{BatchContext, StreamProcessor};
pub use types::{Event, EventPayload, EventType, ScoredEvent, SeverityBand};
