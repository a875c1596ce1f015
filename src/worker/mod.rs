//! Worker subprocesses and the channels that drive them.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Coordinator   │
//!                     │  (WorkerPool)   │
//!                     └────────┬────────┘
//!                              │ stdin/stdout pipes, JSON lines
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ worker-1  │  │ worker-2  │  │ worker-N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!               └──────────────┼──────────────┘
//!                              ▼
//!                          log queue
//! ```
//!
//! Each worker announces itself with a ready message, answers every
//! numbered work request with exactly one result, and exits on the
//! poison pill or when its stdin closes.

pub mod channel;
pub mod compute;
pub mod ipc;
pub mod pool;
pub mod proc;
pub mod protocol;
pub mod spawn;
pub mod worker_main;

pub use channel::{ChannelState, WorkerChannel};
pub use compute::{Compute, Latency, SqrtRatio};
pub use pool::{IdSequence, WorkerPool};
pub use protocol::{Payload, Response, WorkRequest, WorkResponse};
pub use spawn::{WorkerArgs, WorkerConfig, spawn_worker};
pub use worker_main::{run_worker_main, worker_loop};
