//! A worker subprocess and its private request/response pipes.
//!
//! Every request is numbered. The channel remembers outstanding requests
//! in send order and pairs each response with the oldest one; a response
//! for any other sequence number is an error, never a silent mismatch.

use std::collections::VecDeque;
use std::time::Duration;

use super::proc::{Proc, Received};
use super::protocol::{Payload, Response, WorkRequest, WorkResponse};
use super::spawn::{WorkerConfig, spawn_worker};
use crate::error::{ApplogError, Result};

/// Lifecycle of a [`WorkerChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Spawned; no ready message seen yet.
    Starting,
    /// Ready message seen, nothing sent yet.
    Ready,
    /// At least one request is outstanding.
    Busy,
    /// Every request has been answered.
    Idle,
    /// Poison pill sent, waiting for the worker to exit.
    Closing,
    /// Subprocess gone. Terminal.
    Closed,
}

/// Coordinator-side handle to one worker.
pub struct WorkerChannel {
    id: u64,
    proc: Option<Proc>,
    state: ChannelState,
    next_seq: u64,
    outstanding: VecDeque<(u64, Payload)>,
}

impl WorkerChannel {
    /// Start worker `id`.
    pub fn spawn(id: u64, config: &WorkerConfig) -> Result<Self> {
        tracing::debug!(worker_id = id, "creating worker subprocess");
        let proc = spawn_worker(id, config)?;
        tracing::debug!(worker_id = id, pid = proc.pid().as_raw(), "worker subprocess started");
        Ok(Self::from_proc(id, proc))
    }

    /// Wrap an already spawned process speaking the worker protocol.
    pub fn from_proc(id: u64, proc: Proc) -> Self {
        Self {
            id,
            proc: Some(proc),
            state: ChannelState::Starting,
            next_seq: 1,
            outstanding: VecDeque::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Subprocess pid while the channel is open.
    pub fn pid(&self) -> Option<i32> {
        self.proc.as_ref().map(|p| p.pid().as_raw())
    }

    /// Number of requests still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }

    fn open_proc(&mut self) -> Result<&mut Proc> {
        match (&self.state, self.proc.as_mut()) {
            (ChannelState::Closing | ChannelState::Closed, _) | (_, None) => {
                Err(ApplogError::ChannelClosed { id: self.id })
            }
            (_, Some(proc)) => Ok(proc),
        }
    }

    /// Send `item` to the worker. Returns the request's sequence number.
    pub fn send(&mut self, item: Payload) -> Result<u64> {
        let id = self.id;
        let seq = self.next_seq;
        tracing::debug!(worker_id = id, seq, item = %item, "sending work to worker");

        let request = WorkRequest::work(seq, item.clone());
        if let Err(e) = self.open_proc()?.send(&request) {
            // A dead worker is reported as such, not as a write error
            return Err(self.check_exited().unwrap_or(e));
        }

        self.next_seq += 1;
        self.outstanding.push_back((seq, item));
        self.state = ChannelState::Busy;
        Ok(seq)
    }

    /// Next response, if one has arrived. Never blocks.
    pub fn poll_for_response(&mut self) -> Result<Option<Response>> {
        loop {
            match self.open_proc()?.poll(Duration::ZERO)? {
                Received::Pending => return Ok(None),
                Received::Closed => return Err(self.exited()),
                Received::Message(WorkResponse::Ready { worker_id, pid }) => {
                    tracing::debug!(worker_id, pid, "worker ready");
                    if self.state == ChannelState::Starting {
                        self.state = ChannelState::Ready;
                    }
                }
                Received::Message(WorkResponse::Result { seq, result, .. }) => {
                    return self.pair(seq, result).map(Some);
                }
            }
        }
    }

    fn pair(&mut self, seq: u64, result: Option<Payload>) -> Result<Response> {
        let request = match self.outstanding.pop_front() {
            Some((expected, request)) if expected == seq => request,
            head => {
                let expected = head.as_ref().map(|(s, _)| *s);
                if let Some(entry) = head {
                    self.outstanding.push_front(entry);
                }
                return Err(ApplogError::Misattributed {
                    id: self.id,
                    expected,
                    got: seq,
                });
            }
        };

        self.state = if self.outstanding.is_empty() {
            ChannelState::Idle
        } else {
            ChannelState::Busy
        };
        Ok(Response {
            worker_id: self.id,
            seq,
            request,
            result,
        })
    }

    /// Reap a worker whose pipe closed and close the channel.
    fn exited(&mut self) -> ApplogError {
        let reason = self
            .proc
            .as_mut()
            .and_then(|p| p.wait().ok())
            .map(|r| r.description())
            .unwrap_or_else(|| "unknown reason".to_string());
        self.release();
        tracing::warn!(worker_id = self.id, reason = %reason, "worker exited unexpectedly");
        ApplogError::WorkerExited {
            id: self.id,
            reason,
        }
    }

    /// `Some(WorkerExited)` if the subprocess has already terminated.
    fn check_exited(&mut self) -> Option<ApplogError> {
        let proc = self.proc.as_mut()?;
        match proc.try_wait() {
            Ok(Some(_)) => Some(self.exited()),
            _ => None,
        }
    }

    fn release(&mut self) {
        self.proc = None;
        self.outstanding.clear();
        self.state = ChannelState::Closed;
    }

    /// Send the poison pill and block until the worker exits.
    ///
    /// Responses still in flight are discarded. Closing again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(proc) = self.proc.as_mut() else {
            self.state = ChannelState::Closed;
            return Ok(());
        };
        self.state = ChannelState::Closing;

        tracing::debug!(worker_id = self.id, "sending poison-pill to worker");
        // The worker may already be gone; reaping it below still succeeds
        let _ = proc.send(&WorkRequest::Exit);
        proc.close_stdin();

        tracing::debug!(worker_id = self.id, "waiting on worker to exit");
        match proc.drain_until_exit() {
            Ok(reason) => {
                tracing::debug!(worker_id = self.id, reason = %reason, "worker exited")
            }
            Err(e) => tracing::debug!(worker_id = self.id, error = %e, "could not reap worker"),
        }

        if !self.outstanding.is_empty() {
            tracing::debug!(
                worker_id = self.id,
                discarded = self.outstanding.len(),
                "discarding unanswered requests"
            );
        }
        self.release();
        Ok(())
    }
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("id", &self.id)
            .field("pid", &self.pid())
            .field("state", &self.state)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}
