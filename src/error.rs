//! Error types for applog.

use thiserror::Error;

/// Main error type for applog.
#[derive(Error, Debug)]
pub enum ApplogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker {id} channel is closed")]
    ChannelClosed { id: u64 },

    #[error("Worker {id} exited unexpectedly: {reason}")]
    WorkerExited { id: u64, reason: String },

    #[error("Worker {id} answered request {got} while {expected:?} was outstanding")]
    Misattributed {
        id: u64,
        expected: Option<u64>,
        got: u64,
    },

    #[error("Log queue error: {0}")]
    Queue(String),

    #[error("Unknown log level: '{0}'. Valid options: debug, info, warning, error, critical")]
    InvalidLevel(String),

    #[error("Worker pool size must be at least 1")]
    EmptyPool,

    #[error("Aggregator error: {0}")]
    Aggregator(String),
}

/// Result type alias for applog operations.
pub type Result<T> = std::result::Result<T, ApplogError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_channel_closed_message() {
        let err = ApplogError::ChannelClosed { id: 7 };
        assert_eq!(err.to_string(), "Worker 7 channel is closed");
    }

    #[test]
    fn test_worker_exited_message() {
        let err = ApplogError::WorkerExited {
            id: 3,
            reason: "killed by signal SIGKILL".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Worker 3"));
        assert!(msg.contains("SIGKILL"));
    }

    #[test]
    fn test_misattributed_message() {
        let err = ApplogError::Misattributed {
            id: 2,
            expected: Some(4),
            got: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("request 5"));
        assert!(msg.contains("Some(4)"));
    }

    #[test]
    fn test_invalid_level_lists_options() {
        let err = ApplogError::InvalidLevel("loud".to_string());
        let msg = err.to_string();
        assert!(msg.contains("loud"));
        assert!(msg.contains("critical"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "socket missing");
        let err: ApplogError = io_err.into();
        assert!(err.to_string().contains("socket missing"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: ApplogError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
