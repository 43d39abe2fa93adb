//! File dispatch and result aggregation
//!
//! The pool runs files on bounded workers; stats reduce their results.

mod pool;
mod stats;

pub use pool::{default_capacity, DispatchError, DispatchResult, FileJob, WorkerPool};
pub use stats::{get_stats, Stats};
