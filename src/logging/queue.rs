//! Cross-process log queue.
//!
//! The queue is a Unix datagram socket bound by the process that starts the
//! aggregator. Each datagram carries one JSON [`QueueMessage`]. The kernel
//! serializes concurrent senders, so producers need no locking, and a
//! single producer's datagrams arrive in the order it sent them.
//!
//! Producers never write to the socket from the logging call site. A
//! [`LogProducer`] hands messages to a bounded in-process buffer, and a
//! feeder thread drains it into the socket.

use std::fmt;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::LogRecord;
use crate::error::{ApplogError, Result};
use crate::paths;

/// Largest datagram a producer will send.
pub const MAX_DATAGRAM_SIZE: usize = 60 * 1024;

/// Messages buffered per producer before records are dropped.
pub const DEFAULT_PRODUCER_CAPACITY: usize = 64 * 1024;

/// Item carried by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueMessage {
    /// A log record to write.
    #[serde(rename = "record")]
    Record(LogRecord),

    /// Poison pill: the aggregator stops after reading it.
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl QueueMessage {
    /// Encode as one datagram, truncating oversized records.
    ///
    /// Escaping can make the encoding much larger than the text, so the
    /// record is shrunk until the encoded bytes fit. A record that does not
    /// fit even with empty text is an error.
    pub fn to_datagram(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let record = match self {
            Self::Record(record) if bytes.len() > MAX_DATAGRAM_SIZE => record,
            _ => return Ok(bytes),
        };

        let mut shrunk = Self::Record(record.clone());
        let mut budget = MAX_DATAGRAM_SIZE / 2;
        loop {
            if let Self::Record(record) = &mut shrunk {
                record.truncate_to(budget);
            }
            let bytes = serde_json::to_vec(&shrunk)?;
            if bytes.len() <= MAX_DATAGRAM_SIZE {
                return Ok(bytes);
            }
            if budget == 0 {
                return Err(serde::ser::Error::custom(format!(
                    "record of {} bytes does not fit in a datagram",
                    bytes.len()
                )));
            }
            budget /= 2;
        }
    }

    /// Decode one datagram.
    pub fn from_datagram(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Address of a queue, handed to every process that should produce into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddr {
    path: PathBuf,
}

impl QueueAddr {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for QueueAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A freshly bound queue: its address plus the single receiving socket.
pub struct LogQueue {
    addr: QueueAddr,
    socket: UnixDatagram,
}

impl LogQueue {
    /// Bind a new queue at a unique path under the temp dir.
    pub fn create() -> Result<Self> {
        Self::bind(paths::queue_socket_path())
    }

    /// Bind a new queue at `path`.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let socket = UnixDatagram::bind(&path).map_err(|e| {
            ApplogError::Queue(format!(
                "Failed to bind log queue at {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            addr: QueueAddr::new(path),
            socket,
        })
    }

    pub fn addr(&self) -> &QueueAddr {
        &self.addr
    }

    /// Split into the address and the receiving socket's descriptor,
    /// which is handed to the aggregator process.
    pub fn into_parts(self) -> (QueueAddr, OwnedFd) {
        (self.addr, OwnedFd::from(self.socket))
    }

    /// Keep the receiving end in this process.
    pub fn into_receiver(self) -> (QueueAddr, QueueReceiver) {
        (self.addr, QueueReceiver::new(self.socket))
    }
}

/// The consumer end of a queue.
pub struct QueueReceiver {
    socket: UnixDatagram,
    buf: Vec<u8>,
}

impl QueueReceiver {
    pub fn new(socket: UnixDatagram) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_SIZE + 1024],
        }
    }

    /// Take over a socket inherited as a raw descriptor.
    ///
    /// # Safety
    /// `fd` must be an open datagram socket owned by nobody else.
    pub unsafe fn from_raw_fd(fd: i32) -> Self {
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::new(UnixDatagram::from(owned))
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or the wait was
    /// interrupted by a signal.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<QueueMessage>> {
        // A zero read timeout is rejected by the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv(&mut self.buf) {
            Ok(n) => Ok(Some(QueueMessage::from_datagram(&self.buf[..n])?)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Why a message could not be enqueued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("log queue buffer is full")]
    Full,
    #[error("log queue feeder has stopped")]
    Disconnected,
}

enum Envelope {
    Message(QueueMessage),
    Flush(mpsc::Sender<()>),
}

/// Producer handle for one process. Cheap to clone; all clones share one
/// buffer and feeder thread, so their messages stay in order.
#[derive(Clone)]
pub struct LogProducer {
    tx: SyncSender<Envelope>,
}

impl LogProducer {
    /// Connect to the queue at `addr`.
    pub fn connect(addr: &QueueAddr) -> Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(addr.path()).map_err(|e| {
            ApplogError::Queue(format!("Failed to connect to log queue {}: {}", addr, e))
        })?;
        Self::from_socket(socket, DEFAULT_PRODUCER_CAPACITY)
    }

    /// Produce into an already connected socket.
    pub fn from_socket(socket: UnixDatagram, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity);
        thread::Builder::new()
            .name("applog-feeder".to_string())
            .spawn(move || feed(socket, rx))?;
        Ok(Self { tx })
    }

    /// Enqueue without blocking.
    pub fn try_send(&self, message: QueueMessage) -> std::result::Result<(), EnqueueError> {
        self.tx
            .try_send(Envelope::Message(message))
            .map_err(|e| match e {
                TrySendError::Full(_) => EnqueueError::Full,
                TrySendError::Disconnected(_) => EnqueueError::Disconnected,
            })
    }

    /// Wait until everything enqueued so far has been written to the socket.
    ///
    /// Returns `false` if the feeder did not catch up within `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(Envelope::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

/// Send one message straight to the queue without blocking.
///
/// Used for the poison pill when a producer's buffer is full.
pub fn send_direct(addr: &QueueAddr, message: &QueueMessage) -> Result<()> {
    let socket = UnixDatagram::unbound()?;
    socket.set_nonblocking(true)?;
    let bytes = message.to_datagram()?;
    socket.send_to(&bytes, addr.path())?;
    Ok(())
}

/// Feeder loop: drain the buffer into the socket until every producer
/// handle is gone.
fn feed(socket: UnixDatagram, rx: Receiver<Envelope>) {
    let mut reported = false;
    for envelope in rx {
        match envelope {
            Envelope::Message(message) => {
                let result = message
                    .to_datagram()
                    .map_err(io::Error::from)
                    .and_then(|bytes| socket.send(&bytes).map(|_| ()));
                if let Err(e) = result
                    && !reported
                {
                    eprintln!("applog: dropping log records, queue unavailable: {}", e);
                    reported = true;
                }
            }
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
