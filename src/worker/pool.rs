//! Fixed-size pool of worker channels.
//!
//! The pool only creates and holds workers; which worker gets which item
//! is up to the caller. Tear-down is explicit through [`WorkerPool::close_all`]
//! or each channel's `close`.

use super::channel::WorkerChannel;
use super::spawn::WorkerConfig;
use crate::error::{ApplogError, Result};

/// Monotonic worker identities, starting at 1 and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSequence {
    next: u64,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next identity.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The identity the next call to [`next_id`](Self::next_id) returns.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// A set of workers created together.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<WorkerChannel>,
}

impl WorkerPool {
    /// Spawn `size` workers with identities `1..=size`.
    pub fn new(size: usize, config: &WorkerConfig) -> Result<Self> {
        Self::with_ids(size, config, &mut IdSequence::new())
    }

    /// Spawn `size` workers, drawing identities from `ids`.
    ///
    /// If a spawn fails, the workers already started are killed.
    pub fn with_ids(size: usize, config: &WorkerConfig, ids: &mut IdSequence) -> Result<Self> {
        if size == 0 {
            return Err(ApplogError::EmptyPool);
        }

        tracing::debug!(size, first_id = ids.peek(), "making workers");
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            workers.push(WorkerChannel::spawn(ids.next_id(), config)?);
        }
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[WorkerChannel] {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut [WorkerChannel] {
        &mut self.workers
    }

    /// Worker with identity `id`.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut WorkerChannel> {
        self.workers.iter_mut().find(|w| w.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerChannel> {
        self.workers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkerChannel> {
        self.workers.iter_mut()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.workers.iter().map(WorkerChannel::id).collect()
    }

    /// Close every worker, in order.
    pub fn close_all(&mut self) -> Result<()> {
        tracing::debug!(size = self.workers.len(), "closing workers");
        let mut first_error = None;
        for worker in &mut self.workers {
            if let Err(e) = worker.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
