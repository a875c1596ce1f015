//! Multi-process logging.
//!
//! Every process emits [`LogRecord`]s through a [`LogBinding`] into one
//! [`LogQueue`]; a single [`LogAggregator`] process writes them to the
//! sinks in arrival order.

pub mod aggregator;
pub mod binding;
pub mod console;
pub mod queue;
pub mod record;
pub mod sink;

pub use aggregator::{AggregatorArgs, AggregatorConfig, LogAggregator, LoopExit};
pub use binding::{FLUSH_TIMEOUT, LogBinding, QueueLayer, install, process_binding};
pub use queue::{LogProducer, LogQueue, QueueAddr, QueueMessage, QueueReceiver};
pub use record::{Level, LogRecord, ProcessIdentity};
