//! Output sinks owned by the aggregator.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::record::LogRecord;

/// Every destination the aggregator writes to. All sinks share the
/// record line format and each record is flushed as soon as it is written.
pub struct Sinks {
    writers: Vec<Box<dyn Write + Send>>,
}

impl Sinks {
    /// Truncate-open `path` and, if `console` is set, add stdout.
    pub fn open(path: &Path, console: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writers: Vec<Box<dyn Write + Send>> = vec![Box::new(BufWriter::new(file))];
        if console {
            writers.push(Box::new(io::stdout()));
        }
        Ok(Self { writers })
    }

    pub fn from_writers(writers: Vec<Box<dyn Write + Send>>) -> Self {
        Self { writers }
    }

    /// Write one record to every sink.
    ///
    /// Every sink is attempted; the first failure is returned.
    pub fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        let mut line = record.format_line();
        line.push('\n');
        let mut first_error = None;
        for writer in &mut self.writers {
            let result = writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.flush());
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
