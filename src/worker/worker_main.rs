//! Worker subprocess main entry point.
//!
//! This module runs when `applog internal-worker` is invoked. It reads
//! work requests from stdin, computes results and writes responses to
//! stdout until it receives the poison pill or stdin closes.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use super::compute::{Compute, SqrtRatio};
use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{Payload, WorkRequest, WorkResponse};
use super::spawn::WorkerArgs;
use crate::error::Result;
use crate::logging::binding::{self, FLUSH_TIMEOUT, render_error_chain};
use crate::logging::console::{self, ConsoleConfig};
use crate::logging::QueueAddr;
use crate::signals;

/// Run `compute` on `item`, turning errors and panics into `None`.
fn compute_isolated<C: Compute>(compute: &mut C, seq: u64, item: &Payload) -> Option<Payload> {
    match panic::catch_unwind(AssertUnwindSafe(|| compute.compute(item))) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            let chain: &(dyn std::error::Error + 'static) = e.as_ref();
            tracing::error!(seq, error = %render_error_chain(chain), "error processing request");
            None
        }
        Err(payload) => {
            tracing::error!(
                seq,
                error = %panic_message(payload.as_ref()),
                "error processing request"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Worker receive loop.
///
/// Returns when the pill arrives or the coordinator closes stdin.
pub fn worker_loop<C: Compute>(
    worker_id: u64,
    reader: &mut LineReader,
    writer: &mut LineWriter,
    compute: &mut C,
    poll_interval: Duration,
) -> io::Result<()> {
    let ready = WorkResponse::Ready {
        worker_id,
        pid: std::process::id(),
    };
    writer.write_line(&ready.to_line()?)?;
    tracing::info!(worker_id, "worker started");

    loop {
        let line = match reader.poll_line(poll_interval) {
            Ok(Some(line)) => line.to_string(),
            Ok(None) => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::info!(worker_id, "coordinator closed the request pipe");
                break;
            }
            Err(e) => return Err(e),
        };

        let (seq, item) = match WorkRequest::from_line(&line) {
            Ok(WorkRequest::Exit) => {
                tracing::debug!(worker_id, "shutdown message received");
                break;
            }
            Ok(WorkRequest::Work { seq, item }) => (seq, item),
            Err(e) => {
                tracing::error!(worker_id, error = %e, line = %line, "invalid request");
                continue;
            }
        };

        tracing::debug!(worker_id, seq, item = %item, "processing request");
        let result = compute_isolated(compute, seq, &item);
        let response = WorkResponse::result(seq, item, result);
        tracing::debug!(worker_id, seq, "sending response");
        writer.write_line(&response.to_line()?)?;
    }

    tracing::info!(worker_id, "worker process exiting");
    Ok(())
}

/// Entry point of the `internal-worker` subcommand.
///
/// Stdin and stdout must be the pipes created by the coordinator.
pub fn run_worker_main(args: &WorkerArgs) -> Result<()> {
    signals::ignore_sigpipe();

    let binding = match &args.log_queue {
        Some(path) => Some(binding::install(
            &QueueAddr::new(path),
            args.log_level,
            &args.process_name(),
        )?),
        None => {
            console::init(ConsoleConfig::default().with_env_overrides());
            None
        }
    };

    // Safety: file descriptors 0 and 1 are the coordinator's pipes and
    // nothing else in this process uses stdin or stdout
    let mut reader = LineReader::new(unsafe { PipeFd::from_raw(0) });
    let mut writer = LineWriter::new(unsafe { PipeFd::from_raw(1) });
    let mut compute = SqrtRatio::new(args.latency());

    let result = worker_loop(
        args.worker_id,
        &mut reader,
        &mut writer,
        &mut compute,
        args.poll_interval(),
    );
    if let Err(e) = &result {
        tracing::error!(worker_id = args.worker_id, error = %e, "worker loop failed");
    }
    if let Some(binding) = binding {
        binding.flush(FLUSH_TIMEOUT);
    }
    Ok(result?)
}
