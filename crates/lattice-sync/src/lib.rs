//! Lattice sync: batch coalescing and the continuous synchronization engine

pub mod batch;
pub mod engine;


pub use batch::{BatchCoalescer, BatchMetrics, ProcessFn, MAX_RETRIES};
pub use engine::{EngineStats, EventSubscriber, SyncEngine};
