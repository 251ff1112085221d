//! Per-dimension anomaly detectors: behavioral, content, temporal, and
//! repository-context.

pub mod behavioral;
pub mod content;
pub mod context;
pub mod temporal;

pub use behavioral::BehavioralDetector;
pub use content::{ContentDetector, FileChange};
pub use context::ContextScorer;
pub use temporal::TemporalDetector;
