//! Process handle for worker subprocesses.
//!
//! Wraps a child process with IPC channels for communication.

use std::io;
use std::os::fd::OwnedFd;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{WorkRequest, WorkResponse};
use crate::error::{ApplogError, Result};
use crate::signals::{TerminationReason, analyze_wait_status};

/// Interval between exit checks while draining a stopping worker.
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one poll of the worker's stdout.
#[derive(Debug)]
pub enum Received {
    Message(WorkResponse),
    /// Nothing complete yet.
    Pending,
    /// The worker closed its stdout.
    Closed,
}

/// Handle to a worker subprocess with IPC channels.
pub struct Proc {
    pid: Pid,
    /// Writer for sending requests to the worker; `None` once closed
    writer: Option<LineWriter>,
    /// Reader for receiving responses from the worker
    reader: LineReader,
    /// Set once the process has been reaped
    exit: Option<TerminationReason>,
}

impl Proc {
    pub fn new(pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            pid,
            writer: Some(LineWriter::new(stdin)),
            reader: LineReader::new(stdout),
            exit: None,
        }
    }

    /// Create from a spawned `std::process::Child`.
    ///
    /// Takes ownership of the child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ApplogError::Worker("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ApplogError::Worker("Child stdout not captured".into()))?;

        Ok(Self::new(
            pid,
            PipeFd::new(OwnedFd::from(stdin)),
            PipeFd::new(OwnedFd::from(stdout)),
        ))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Why the process ended, once it has been reaped.
    pub fn exit_reason(&self) -> Option<&TerminationReason> {
        self.exit.as_ref()
    }

    /// Send a request to the worker.
    pub fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let line = request.to_line()?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ApplogError::Worker("Worker stdin already closed".into()))?;
        writer
            .write_line(&line)
            .map_err(|e| ApplogError::Worker(format!("Failed to send to worker: {}", e)))
    }

    /// Close the worker's stdin; it reads EOF after any pending requests.
    pub fn close_stdin(&mut self) {
        self.writer = None;
    }

    /// Wait up to `timeout` for the next message from the worker.
    pub fn poll(&mut self, timeout: Duration) -> Result<Received> {
        match self.reader.poll_line(timeout) {
            Ok(Some(line)) => {
                let response = WorkResponse::from_line(line).map_err(|e| {
                    ApplogError::Worker(format!("Invalid worker response: {}", e))
                })?;
                Ok(Received::Message(response))
            }
            Ok(None) => Ok(Received::Pending),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Received::Closed),
            Err(e) => Err(ApplogError::Worker(format!(
                "Failed to receive from worker: {}",
                e
            ))),
        }
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Try to reap the process without blocking.
    ///
    /// Returns `None` while it is still running.
    pub fn try_wait(&mut self) -> Result<Option<TerminationReason>> {
        if let Some(reason) = &self.exit {
            return Ok(Some(reason.clone()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => Ok(Some(self.record_exit(status))),
            Err(e) => Err(ApplogError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<TerminationReason> {
        if let Some(reason) = &self.exit {
            return Ok(reason.clone());
        }
        match waitpid(self.pid, None) {
            Ok(status) => Ok(self.record_exit(status)),
            Err(e) => Err(ApplogError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Block until the process exits, reading and discarding its output so
    /// it never stalls on a full pipe.
    pub fn drain_until_exit(&mut self) -> Result<TerminationReason> {
        loop {
            if let Some(reason) = self.try_wait()? {
                return Ok(reason);
            }
            // Unread responses and garbage alike are discarded
            if let Ok(Received::Closed) = self.poll(DRAIN_INTERVAL) {
                return self.wait();
            }
        }
    }

    fn record_exit(&mut self, status: WaitStatus) -> TerminationReason {
        let reason = analyze_wait_status(status);
        self.exit = Some(reason.clone());
        reason
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| ApplogError::Worker(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL to the process and wait for it to exit.
    pub fn kill(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| ApplogError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        self.wait()?;
        Ok(())
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if self.exit.is_none() {
            // Try graceful termination
            let _ = self.terminate();
            std::thread::sleep(Duration::from_millis(10));

            if let Ok(Some(_)) = self.try_wait() {
                return;
            }

            // Force kill
            if self.kill().is_err() {
                let _ = waitpid(self.pid, None);
            }
        }
    }
}
