//! Log records shipped from producer processes to the aggregator.
//!
//! A [`LogRecord`] is plain owned data. Failures attached to an event are
//! rendered to text when the record is captured, so nothing live ever
//! crosses a process boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::error::ApplogError;

/// Timestamp layout shared by every sink.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Marker appended to text cut short to fit a datagram.
const TRUNCATION_MARKER: &str = " [truncated]";

/// Record severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[default]
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// All levels in ascending severity.
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Upper-case name as written to sinks.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Map a tracing level. `critical` is set for error events raised
    /// through [`critical!`](crate::critical).
    pub fn from_tracing(level: &tracing::Level, critical: bool) -> Self {
        if *level == tracing::Level::ERROR {
            if critical { Self::Critical } else { Self::Error }
        } else if *level == tracing::Level::WARN {
            Self::Warning
        } else if *level == tracing::Level::INFO {
            Self::Info
        } else {
            Self::Debug
        }
    }

    /// Most verbose tracing filter that can still yield a record at this level.
    pub fn tracing_filter(&self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::TRACE,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

impl FromStr for Level {
    type Err = ApplogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            _ => Err(ApplogError::InvalidLevel(s.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and pid of the process that produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub name: String,
    pub pid: u32,
}

impl ProcessIdentity {
    /// Identity of the calling process under the given name.
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: std::process::id(),
        }
    }
}

/// One log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: Level,
    /// Hierarchical logger name (the tracing target).
    pub logger: String,
    pub message: String,
    /// Structured fields, already rendered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<(String, String)>,
    pub timestamp: DateTime<Local>,
    pub process: ProcessIdentity,
    /// Failure text captured with the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl LogRecord {
    /// Capture a record now.
    pub fn new(
        level: Level,
        logger: impl Into<String>,
        message: impl Into<String>,
        process: ProcessIdentity,
    ) -> Self {
        Self {
            level,
            logger: logger.into(),
            message: message.into(),
            fields: Vec::new(),
            timestamp: Local::now(),
            process,
            trace: None,
        }
    }

    /// Attach structured fields.
    pub fn with_fields(mut self, fields: Vec<(String, String)>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach rendered failure text.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Render the sink line:
    /// `<timestamp> <process:<10> <logger> <level:<8> <message>[ k=v]...`
    /// followed by the trace on its own lines when present.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "{} {:<10} {} {:<8} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.process.name,
            self.logger,
            self.level.as_str(),
            self.message
        );
        for (key, value) in &self.fields {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        if let Some(trace) = &self.trace {
            line.push('\n');
            line.push_str(trace.trim_end());
        }
        line
    }

    /// Shrink message, fields and trace so the whole record stays
    /// under roughly `budget` bytes of text.
    pub fn truncate_to(&mut self, budget: usize) {
        let quarter = budget / 4;
        truncate_text(&mut self.message, quarter * 2);
        if let Some(trace) = self.trace.as_mut() {
            truncate_text(trace, quarter);
        }
        let per_field = quarter / self.fields.len().max(1);
        for (_, value) in &mut self.fields {
            truncate_text(value, per_field);
        }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
fn truncate_text(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max.saturating_sub(TRUNCATION_MARKER.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str(TRUNCATION_MARKER);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_record(level: Level, message: &str) -> LogRecord {
        let mut record = LogRecord::new(
            level,
            "applog::worker",
            message,
            ProcessIdentity {
                name: "worker-1".to_string(),
                pid: 4242,
            },
        );
        record.timestamp = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        record
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
        let mut sorted = Level::ALL;
        sorted.sort();
        assert_eq!(sorted, Level::ALL);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("INFO".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("error".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("CRITICAL".parse::<Level>().unwrap(), Level::Critical);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_display_roundtrips_through_from_str() {
        for level in Level::ALL {
            assert_eq!(level.to_string().parse::<Level>().unwrap(), level);
        }
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(
            Level::from_tracing(&tracing::Level::TRACE, false),
            Level::Debug
        );
        assert_eq!(
            Level::from_tracing(&tracing::Level::DEBUG, false),
            Level::Debug
        );
        assert_eq!(Level::from_tracing(&tracing::Level::INFO, false), Level::Info);
        assert_eq!(
            Level::from_tracing(&tracing::Level::WARN, false),
            Level::Warning
        );
        assert_eq!(
            Level::from_tracing(&tracing::Level::ERROR, false),
            Level::Error
        );
        assert_eq!(
            Level::from_tracing(&tracing::Level::ERROR, true),
            Level::Critical
        );
        // The critical flag only promotes error events
        assert_eq!(Level::from_tracing(&tracing::Level::INFO, true), Level::Info);
    }

    #[test]
    fn test_format_line_pads_columns() {
        let record = fixed_record(Level::Info, "processing request 9");
        assert_eq!(
            record.format_line(),
            "2024-03-09 14:05:07,000 worker-1   applog::worker INFO     processing request 9"
        );
    }

    #[test]
    fn test_format_line_with_fields_and_trace() {
        let record = fixed_record(Level::Error, "error processing request")
            .with_fields(vec![("seq".to_string(), "3".to_string())])
            .with_trace("division by zero\n");
        let line = record.format_line();
        let mut lines = line.lines();
        assert!(
            lines
                .next()
                .unwrap()
                .ends_with("ERROR    error processing request seq=3")
        );
        assert_eq!(lines.next(), Some("division by zero"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_long_process_name_is_not_cut() {
        let mut record = fixed_record(Level::Critical, "bye");
        record.process.name = "aggregator-process".to_string();
        let line = record.format_line();
        assert!(line.contains(" aggregator-process applog::worker CRITICAL bye"));
    }

    #[test]
    fn test_truncate_to_respects_char_boundaries() {
        let mut record = fixed_record(Level::Debug, &"é".repeat(1000));
        record.trace = Some("x".repeat(1000));
        record.truncate_to(400);
        assert!(record.message.len() <= 200);
        assert!(record.message.ends_with(TRUNCATION_MARKER));
        assert!(record.trace.as_ref().unwrap().len() <= 100);
    }

    #[test]
    fn test_truncate_leaves_short_text_alone() {
        let mut record = fixed_record(Level::Debug, "short");
        record.truncate_to(4096);
        assert_eq!(record.message, "short");
    }

    #[test]
    fn test_record_serialization_drops_empty_optionals() {
        let record = fixed_record(Level::Warning, "careful");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"WARNING\""));
        assert!(!json.contains("trace"));
        assert!(!json.contains("fields"));
        let parsed: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
