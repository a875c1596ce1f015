//! Sample application: random dispatch over a worker pool.
//!
//! Items are handed to randomly chosen workers up front, then every worker
//! is polled on a fixed interval until all responses are in or the
//! deadline passes.

use std::time::{Duration, Instant};

use serde_json::json;

use crate::critical;
use crate::error::{ApplogError, Result};
use crate::worker::{WorkerConfig, WorkerPool};

/// Demo run parameters.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Pool size (default: 10)
    pub workers: usize,
    /// Items to dispatch (default: 100)
    pub tasks: usize,
    /// Give up collecting after this long (default: 10s)
    pub max_wait: Duration,
    /// Pause between polling rounds (default: 100ms)
    pub poll_interval: Duration,
    /// Items are drawn from `0..=max_item` (default: 50)
    pub max_item: i64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            tasks: 100,
            max_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            max_item: 50,
        }
    }
}

impl DemoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_tasks(mut self, tasks: usize) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_item(mut self, max_item: i64) -> Self {
        self.max_item = max_item.max(0);
        self
    }
}

/// What a demo run observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoReport {
    /// Items accepted by a worker.
    pub sent: usize,
    /// Responses collected before the deadline.
    pub received: usize,
    /// Responses whose computation failed.
    pub failures: usize,
    /// Responses that did not match the request they arrived for.
    pub misattributed: usize,
    /// Whether collection stopped at the deadline.
    pub timed_out: bool,
}

impl DemoReport {
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.misattributed == 0 && self.received == self.sent
    }
}

/// Run the demo on a fresh pool built from `workers`.
pub fn run(config: &DemoConfig, workers: &WorkerConfig) -> Result<DemoReport> {
    let mut pool = WorkerPool::new(config.workers, workers)?;
    let mut report = DemoReport::default();

    tracing::debug!(tasks = config.tasks, "assigning work");
    for _ in 0..config.tasks {
        let index = fastrand::usize(..pool.len());
        let item = fastrand::i64(0..=config.max_item);
        let worker = &mut pool.workers_mut()[index];
        match worker.send(json!(item)) {
            Ok(_) => report.sent += 1,
            Err(e) => tracing::error!(worker_id = worker.id(), error = %e, "could not send work"),
        }
    }

    let started = Instant::now();
    tracing::debug!(
        max_wait_sec = config.max_wait.as_secs(),
        "waiting on responses"
    );
    while report.received < report.sent {
        if started.elapsed() > config.max_wait {
            critical!("gave up waiting for responses...shutting down");
            report.timed_out = true;
            break;
        }

        tracing::trace!("polling for responses");
        for worker in pool.iter_mut().filter(|w| !w.is_closed()) {
            loop {
                match worker.poll_for_response() {
                    Ok(Some(response)) => {
                        tracing::debug!(
                            worker_id = response.worker_id,
                            seq = response.seq,
                            request = %response.request,
                            result = ?response.result,
                            "got response"
                        );
                        report.received += 1;
                        if response.is_failure() {
                            report.failures += 1;
                        }
                    }
                    Ok(None) => break,
                    Err(e @ ApplogError::Misattributed { .. }) => {
                        tracing::error!(error = %e, "response does not match its request");
                        report.misattributed += 1;
                    }
                    Err(e) => {
                        tracing::error!(worker_id = worker.id(), error = %e, "worker failed");
                        break;
                    }
                }
            }
        }
        std::thread::sleep(config.poll_interval);
    }

    if report.received >= report.sent {
        tracing::debug!("all work complete!");
    }

    pool.close_all()?;
    tracing::debug!(
        sent = report.sent,
        received = report.received,
        failures = report.failures,
        "done"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_config_defaults() {
        let config = DemoConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.tasks, 100);
        assert_eq!(config.max_wait, Duration::from_secs(10));
        assert_eq!(config.max_item, 50);
    }

    #[test]
    fn test_demo_config_builder() {
        let config = DemoConfig::new()
            .with_workers(3)
            .with_tasks(12)
            .with_max_wait(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(5))
            .with_max_item(-1);
        assert_eq!(config.workers, 3);
        assert_eq!(config.tasks, 12);
        assert_eq!(config.max_wait, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.max_item, 0);
    }

    #[test]
    fn test_report_completeness() {
        let mut report = DemoReport {
            sent: 4,
            received: 4,
            failures: 1,
            ..DemoReport::default()
        };
        assert!(report.is_complete());
        report.timed_out = true;
        assert!(!report.is_complete());
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let err = run(&DemoConfig::new().with_workers(0), &WorkerConfig::default()).unwrap_err();
        assert!(matches!(err, ApplogError::EmptyPool));
    }
}
