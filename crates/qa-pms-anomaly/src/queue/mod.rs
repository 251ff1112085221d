//! Severity-ranked priority queue.

pub mod priority_queue;

pub use priority_queue::{PriorityQueue, QueueItem, QueueStats};
