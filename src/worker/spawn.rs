//! Worker subprocess spawning.
//!
//! Workers are started as `applog internal-worker ...` with piped stdin and
//! stdout. Stderr is inherited so panics and early failures stay visible.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use super::compute::Latency;
use super::proc::Proc;
use crate::error::{ApplogError, Result};
use crate::logging::{Level, LogBinding, QueueAddr};
use crate::spawn::{Launcher, WORKER_COMMAND};

/// Default wait for a request per receive-loop iteration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for worker processes.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Program to start workers from (default: current executable)
    pub launcher: Option<Launcher>,
    /// Queue workers log into (None = stderr only)
    pub log_queue: Option<QueueAddr>,
    /// Minimum severity workers forward (default: DEBUG)
    pub log_level: Level,
    /// Simulated computation time
    pub latency: Latency,
    /// Worker receive-loop wait (default: 100ms)
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            launcher: None,
            log_queue: None,
            log_level: Level::Debug,
            latency: Latency::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log into the same queue, at the same level, as `binding`.
    pub fn from_binding(binding: &LogBinding) -> Self {
        Self {
            log_queue: binding.addr().cloned(),
            log_level: binding.level(),
            ..Self::default()
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_latency(mut self, latency: Latency) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Arguments for worker `worker_id`.
    pub fn args(&self, worker_id: u64) -> WorkerArgs {
        WorkerArgs {
            worker_id,
            log_queue: self.log_queue.as_ref().map(|q| q.path().to_path_buf()),
            log_level: self.log_level,
            min_latency_ms: self.latency.min.as_millis() as u64,
            max_latency_ms: self.latency.max.as_millis() as u64,
            poll_interval_ms: self.poll_interval.as_millis() as u64,
        }
    }
}

/// Arguments of the hidden `internal-worker` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct WorkerArgs {
    /// Identity assigned by the pool.
    #[arg(long)]
    pub worker_id: u64,

    /// Log queue socket to connect to.
    #[arg(long)]
    pub log_queue: Option<PathBuf>,

    /// Minimum severity to forward.
    #[arg(long, default_value_t = Level::Debug)]
    pub log_level: Level,

    #[arg(long, default_value_t = 100)]
    pub min_latency_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub max_latency_ms: u64,

    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,
}

impl WorkerArgs {
    pub fn latency(&self) -> Latency {
        Latency::from_millis(self.min_latency_ms, self.max_latency_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Process name used in log records.
    pub fn process_name(&self) -> String {
        format!("worker-{}", self.worker_id)
    }

    /// Command-line form accepted by the `internal-worker` subcommand.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--worker-id".into(), self.worker_id.to_string().into()];
        if let Some(queue) = &self.log_queue {
            args.push("--log-queue".into());
            args.push(queue.clone().into());
        }
        for (flag, value) in [
            ("--log-level", self.log_level.to_string()),
            ("--min-latency-ms", self.min_latency_ms.to_string()),
            ("--max-latency-ms", self.max_latency_ms.to_string()),
            ("--poll-interval-ms", self.poll_interval_ms.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args
    }
}

/// Spawn worker `worker_id`.
pub fn spawn_worker(worker_id: u64, config: &WorkerConfig) -> Result<Proc> {
    let launcher = Launcher::resolve(config.launcher.as_ref())?;
    let mut cmd = launcher.command(WORKER_COMMAND, config.args(worker_id).to_args());

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    let child = cmd
        .spawn()
        .map_err(|e| ApplogError::Worker(format!("Failed to spawn worker {}: {}", worker_id, e)))?;

    Proc::from_child(child)
}
