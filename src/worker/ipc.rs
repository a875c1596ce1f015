//! Line-based IPC over pipes.
//!
//! Reads and writes retry on EINTR. [`LineReader::poll_line`] waits for a
//! complete line with `poll(2)` and never blocks past its timeout.

use std::io::{self, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(()) // Pipes don't need flushing at the fd level
    }
}

/// Line reader that can wait for input with a timeout.
pub struct LineReader {
    fd: PipeFd,
    pending: Vec<u8>,
    line: String,
    chunk: Box<[u8]>,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            fd,
            pending: Vec::with_capacity(4096),
            line: String::with_capacity(4096),
            chunk: vec![0u8; DEFAULT_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Wait up to `timeout` for a complete line. `Duration::ZERO` only
    /// checks what is already available.
    ///
    /// Returns `Ok(None)` if no line arrived in time and an error of kind
    /// `UnexpectedEof` once the writer has closed and every line was read.
    pub fn poll_line(&mut self, timeout: Duration) -> io::Result<Option<&str>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.take_line() {
                return Ok(Some(&self.line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_readable(remaining)? {
                return Ok(None);
            }
            if self.fill()? == 0 {
                if self.take_rest() {
                    return Ok(Some(&self.line));
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipe closed by writer",
                ));
            }
        }
    }

    /// Move the first complete line out of `pending`.
    fn take_line(&mut self) -> bool {
        let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
            return false;
        };
        let mut end = pos;
        if end > 0 && self.pending[end - 1] == b'\r' {
            end -= 1;
        }
        self.line.clear();
        self.line
            .push_str(&String::from_utf8_lossy(&self.pending[..end]));
        self.pending.drain(..=pos);
        true
    }

    /// Move an unterminated final line out of `pending`.
    fn take_rest(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.line.clear();
        self.line.push_str(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();
        true
    }

    fn fill(&mut self) -> io::Result<usize> {
        let n = self.fd.read(&mut self.chunk)?;
        self.pending.extend_from_slice(&self.chunk[..n]);
        Ok(n)
    }

    /// Whether a read would not block within `timeout`. Hangup counts as readable.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => Ok(n > 0),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
}

/// Buffered line writer for IPC.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_pipe() -> (PipeFd, PipeFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
        (PipeFd::new(read_fd), PipeFd::new(write_fd))
    }

    const WAIT: Duration = Duration::from_millis(100);

    #[test]
    fn test_line_reader_writer_roundtrip() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("hello").unwrap();
        writer.write_line("world\n").unwrap(); // Already has newline
        writer.write_line("").unwrap();
        drop(writer); // Close write end to signal EOF

        assert_eq!(reader.poll_line(WAIT).unwrap(), Some("hello"));
        assert_eq!(reader.poll_line(WAIT).unwrap(), Some("world"));
        assert_eq!(reader.poll_line(WAIT).unwrap(), Some(""));
        let err = reader.poll_line(WAIT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_crlf_handling() {
        let (read_fd, mut write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);

        write_fd.write_all(b"line1\r\nline2\n").unwrap();
        drop(write_fd);

        assert_eq!(reader.poll_line(WAIT).unwrap(), Some("line1"));
        assert_eq!(reader.poll_line(WAIT).unwrap(), Some("line2"));
    }

    #[test]
    fn test_poll_line_returns_none_when_idle() {
        let (read_fd, _write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);

        assert_eq!(reader.poll_line(Duration::ZERO).unwrap(), None);

        let start = Instant::now();
        assert_eq!(reader.poll_line(Duration::from_millis(50)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_poll_line_waits_for_the_full_line() {
        let (read_fd, mut write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);

        write_fd.write_all(b"{\"type\":").unwrap();
        assert_eq!(reader.poll_line(Duration::from_millis(20)).unwrap(), None);

        write_fd.write_all(b"\"exit\"}\nnext").unwrap();
        assert_eq!(
            reader.poll_line(Duration::from_millis(20)).unwrap(),
            Some("{\"type\":\"exit\"}")
        );
        assert_eq!(reader.poll_line(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_poll_line_reports_eof_after_last_line() {
        let (read_fd, mut write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);

        write_fd.write_all(b"first\nsecond").unwrap();
        drop(write_fd);

        assert_eq!(
            reader.poll_line(Duration::from_millis(100)).unwrap(),
            Some("first")
        );
        assert_eq!(
            reader.poll_line(Duration::from_millis(100)).unwrap(),
            Some("second")
        );
        let err = reader.poll_line(Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_poll_line_sees_data_written_from_another_thread() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            LineWriter::new(write_fd).write_line("late").unwrap();
        });

        assert_eq!(
            reader.poll_line(Duration::from_secs(5)).unwrap(),
            Some("late")
        );
        writer.join().unwrap();
    }
}
