//! applog: multi-process log aggregation and worker subprocess pools.
//!
//! A [`LogAggregator`](logging::LogAggregator) process owns the log sinks.
//! Every other process, the coordinator and each worker alike, forwards
//! its `tracing` events there through a [`LogBinding`](logging::LogBinding).
//! A [`WorkerPool`](worker::WorkerPool) runs long-lived worker processes,
//! each driven over its own [`WorkerChannel`](worker::WorkerChannel).

pub mod demo;
pub mod error;
pub mod logging;
pub mod paths;
pub mod signals;
pub mod spawn;
pub mod worker;

pub use error::{ApplogError, Result};

#[doc(hidden)]
pub use tracing as __tracing;
