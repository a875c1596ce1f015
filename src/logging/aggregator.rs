//! The log aggregator process.
//!
//! [`LogAggregator::start`] binds the queue, re-executes the binary as
//! `applog internal-aggregator` with the receiving socket as its stdin,
//! and binds the calling process as a producer. The child runs
//! [`run_aggregator_main`], which drains the queue into the sinks until it
//! reads the poison pill, goes idle for too long, hits an error or is
//! signalled.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::binding::{self, LogBinding, render_error_chain};
use super::queue::{
    EnqueueError, LogProducer, LogQueue, QueueAddr, QueueMessage, QueueReceiver, send_direct,
};
use super::record::{Level, LogRecord, ProcessIdentity};
use super::sink::Sinks;
use crate::error::{ApplogError, Result};
use crate::paths::DEFAULT_LOG_FILE;
use crate::signals;
use crate::spawn::{AGGREGATOR_COMMAND, Launcher};

/// Process name stamped on records written by the calling process.
pub const MAIN_PROCESS_NAME: &str = "main";

/// Process name stamped on the aggregator's own records.
pub const AGGREGATOR_PROCESS_NAME: &str = "aggregator";

/// Logger name of the aggregator's own records.
pub const AGGREGATOR_LOGGER: &str = "applog.aggregator";

/// Longest single wait on the queue; bounds reaction time to signals.
const RECV_SLICE: Duration = Duration::from_millis(250);

/// Pause between attempts to enqueue the poison pill into a full queue.
const PILL_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregator configuration.
///
/// Use the builder methods to customize, then pass to [`LogAggregator::start`].
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Minimum severity producers forward (default: DEBUG)
    pub level: Level,
    /// Output file, truncated on start (default: applog.txt)
    pub log_file: PathBuf,
    /// Also write to stdout (default: false)
    pub console: bool,
    /// Stop after this long without a record; `None` waits forever (default: 5s)
    pub idle_timeout: Option<Duration>,
    /// Program to start the aggregator from (default: current executable)
    pub launcher: Option<Launcher>,
    /// Install the binding as this process's global subscriber (default: true)
    pub bind_current_process: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            level: Level::Debug,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            console: false,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            launcher: None,
            bind_current_process: true,
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Set the idle timeout in whole seconds; zero or negative waits forever.
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.idle_timeout = timeout_from_secs(secs);
        self
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Leave the global tracing subscriber alone; log through
    /// [`LogAggregator::binding`] explicitly.
    pub fn without_process_binding(mut self) -> Self {
        self.bind_current_process = false;
        self
    }

    fn child_args(&self) -> AggregatorArgs {
        AggregatorArgs {
            log_file: self.log_file.clone(),
            stdout: self.console,
            timeout_sec: self.idle_timeout.map_or(0, |t| t.as_secs().max(1) as i64),
        }
    }
}

/// Idle timeout for a seconds value where `<= 0` means "wait forever".
pub fn timeout_from_secs(secs: i64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs as u64))
}

/// Arguments of the hidden `internal-aggregator` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct AggregatorArgs {
    /// File to write, truncated first.
    #[arg(long)]
    pub log_file: PathBuf,

    /// Also write records to stdout.
    #[arg(long)]
    pub stdout: bool,

    /// Idle timeout in seconds (0 or less waits forever).
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    pub timeout_sec: i64,
}

impl AggregatorArgs {
    /// Command-line form accepted by the `internal-aggregator` subcommand.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--log-file".into(), self.log_file.clone().into()];
        if self.stdout {
            args.push("--stdout".into());
        }
        args.push("--timeout-sec".into());
        args.push(self.timeout_sec.to_string().into());
        args
    }
}

/// Handle to a running aggregator process.
pub struct LogAggregator {
    addr: QueueAddr,
    binding: LogBinding,
    child: Option<Child>,
}

impl LogAggregator {
    /// Create the queue, start the aggregator process and bind the
    /// calling process to it.
    pub fn start(config: AggregatorConfig) -> Result<Self> {
        // Surface a bad path here rather than only in the child
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .map_err(|e| {
                ApplogError::Aggregator(format!(
                    "Cannot open log file {}: {}",
                    config.log_file.display(),
                    e
                ))
            })?;

        let launcher = Launcher::resolve(config.launcher.as_ref())?;
        let (addr, receiver_fd) = LogQueue::create()?.into_parts();

        let mut cmd = launcher.command(AGGREGATOR_COMMAND, config.child_args().to_args());
        cmd.stdin(Stdio::from(receiver_fd));
        cmd.stdout(if config.console {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            let _ = std::fs::remove_file(addr.path());
            ApplogError::Aggregator(format!("Failed to spawn aggregator: {}", e))
        })?;

        let binding = match Self::bind(&config, &addr) {
            Ok(binding) => binding,
            Err(e) => {
                abandon(&mut child, &addr);
                return Err(e);
            }
        };
        tracing::debug!(
            pid = child.id(),
            queue = %addr,
            log_file = %config.log_file.display(),
            "aggregator started"
        );

        Ok(Self {
            addr,
            binding,
            child: Some(child),
        })
    }

    fn bind(config: &AggregatorConfig, addr: &QueueAddr) -> Result<LogBinding> {
        if config.bind_current_process {
            let installed = binding::install(addr, config.level, MAIN_PROCESS_NAME)?;
            if installed.addr() == Some(addr) {
                return Ok(installed);
            }
        }
        LogBinding::connect(addr, config.level, MAIN_PROCESS_NAME)
    }

    /// Address other processes connect to.
    pub fn queue(&self) -> &QueueAddr {
        &self.addr
    }

    /// This process's producer binding.
    pub fn binding(&self) -> &LogBinding {
        &self.binding
    }

    /// Whether the aggregator process is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Send the poison pill and wait for the aggregator to exit.
    ///
    /// Never fails: the aggregator may already have stopped on its own.
    pub fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        let delivered = send_pill(self.binding.producer(), &self.addr, || {
            !matches!(child.try_wait(), Ok(None))
        });
        if !delivered {
            tracing::debug!("aggregator exited before the shutdown message was delivered");
        }

        let _ = child.wait();
        let _ = std::fs::remove_file(self.addr.path());
    }
}

/// Deliver the poison pill behind everything `producer` has buffered,
/// retrying while the queue is full until `exited` reports the
/// aggregator gone. Returns whether the pill was handed over.
fn send_pill(producer: &LogProducer, addr: &QueueAddr, mut exited: impl FnMut() -> bool) -> bool {
    loop {
        match producer.try_send(QueueMessage::Shutdown) {
            Ok(()) => return true,
            Err(EnqueueError::Full) => {}
            // Feeder gone: nothing is buffered ahead of the pill
            Err(EnqueueError::Disconnected) => {
                if send_direct(addr, &QueueMessage::Shutdown).is_ok() {
                    return true;
                }
            }
        }
        if exited() {
            return false;
        }
        std::thread::sleep(PILL_RETRY_INTERVAL);
    }
}

/// Abandon a freshly spawned aggregator whose caller could not be bound.
fn abandon(child: &mut Child, addr: &QueueAddr) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_file(addr.path());
}

impl Drop for LogAggregator {
    fn drop(&mut self) {
        self.close();
    }
}

/// How the consume loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Poison pill received.
    Shutdown,
    /// No record within the idle timeout.
    IdleTimeout,
    /// Receive, decode or write failure.
    Failed,
    /// SIGINT or SIGTERM.
    Interrupted,
}

/// Write one of the aggregator's own records straight to the sinks.
fn write_own(sinks: &mut Sinks, message: impl Into<String>, trace: Option<String>) {
    let mut record = LogRecord::new(
        Level::Critical,
        AGGREGATOR_LOGGER,
        message,
        ProcessIdentity::current(AGGREGATOR_PROCESS_NAME),
    );
    record.trace = trace;
    if let Err(e) = sinks.write(&record) {
        eprintln!("applog: aggregator could not write to its sinks: {}", e);
    }
}

/// Drain `receiver` into `sinks` until a terminal condition.
///
/// Writes a final CRITICAL record for every exit except `Interrupted`.
pub fn consume(
    receiver: &mut QueueReceiver,
    sinks: &mut Sinks,
    idle_timeout: Option<Duration>,
    stop: &AtomicBool,
) -> LoopExit {
    let exit = consume_until_exit(receiver, sinks, idle_timeout, stop);
    if exit != LoopExit::Interrupted {
        write_own(sinks, "aggregator shutting down", None);
    }
    exit
}

fn consume_until_exit(
    receiver: &mut QueueReceiver,
    sinks: &mut Sinks,
    idle_timeout: Option<Duration>,
    stop: &AtomicBool,
) -> LoopExit {
    let mut last_item = Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            return LoopExit::Interrupted;
        }

        let wait = match idle_timeout {
            Some(timeout) => {
                let idle = last_item.elapsed();
                if idle >= timeout {
                    write_own(
                        sinks,
                        format!(
                            "aggregator shutting down after timeout of {} sec",
                            timeout.as_secs()
                        ),
                        None,
                    );
                    return LoopExit::IdleTimeout;
                }
                (timeout - idle).min(RECV_SLICE)
            }
            None => RECV_SLICE,
        };

        match receiver.recv_timeout(wait) {
            Ok(None) => continue,
            Ok(Some(QueueMessage::Shutdown)) => {
                write_own(sinks, "aggregator told to shut down", None);
                return LoopExit::Shutdown;
            }
            Ok(Some(QueueMessage::Record(record))) => {
                last_item = Instant::now();
                if let Err(e) = sinks.write(&record) {
                    write_own(sinks, "aggregator caught error", Some(render_error_chain(&e)));
                    return LoopExit::Failed;
                }
            }
            Err(e) => {
                write_own(sinks, "aggregator caught error", Some(render_error_chain(&e)));
                return LoopExit::Failed;
            }
        }
    }
}

/// Entry point of the `internal-aggregator` subcommand.
///
/// Stdin must be the receiving end of the queue socket.
pub fn run_aggregator_main(args: &AggregatorArgs) -> Result<LoopExit> {
    let stop = signals::install_termination_flag();
    let mut sinks = Sinks::open(&args.log_file, args.stdout).map_err(|e| {
        ApplogError::Aggregator(format!(
            "Cannot open log file {}: {}",
            args.log_file.display(),
            e
        ))
    })?;

    // Safety: the parent passes the queue socket as fd 0 and nothing else uses stdin
    let mut receiver = unsafe { QueueReceiver::from_raw_fd(0) };
    Ok(consume(
        &mut receiver,
        &mut sinks,
        timeout_from_secs(args.timeout_sec),
        stop,
    ))
}
