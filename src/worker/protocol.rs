//! IPC protocol for worker subprocess communication.
//!
//! Messages are JSON-serialized and newline-delimited. Every work request
//! carries a per-channel sequence number that the worker echoes back.

use serde::{Deserialize, Serialize};

/// Opaque work item or result.
pub type Payload = serde_json::Value;

/// Request from coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkRequest {
    /// Compute a result for `item`.
    #[serde(rename = "work")]
    Work { seq: u64, item: Payload },

    /// Poison pill: finish and exit.
    #[serde(rename = "exit")]
    Exit,
}

/// Message from worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkResponse {
    /// Worker entered its receive loop.
    #[serde(rename = "ready")]
    Ready { worker_id: u64, pid: u32 },

    /// Outcome for request `seq`. `result` is `None` when computing failed.
    #[serde(rename = "result")]
    Result {
        seq: u64,
        item: Payload,
        result: Option<Payload>,
    },
}

impl WorkRequest {
    pub fn work(seq: u64, item: Payload) -> Self {
        Self::Work { seq, item }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    pub fn result(seq: u64, item: Payload, result: Option<Payload>) -> Self {
        Self::Result { seq, item, result }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// A response paired with the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Worker that computed it.
    pub worker_id: u64,
    /// Sequence number of the request.
    pub seq: u64,
    /// The request item as sent.
    pub request: Payload,
    /// `None` marks a failed computation.
    pub result: Option<Payload>,
}

impl Response {
    pub fn is_failure(&self) -> bool {
        self.result.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_request_wire_format() {
        let line = WorkRequest::work(3, json!(16)).to_line().unwrap();
        assert_eq!(line, "{\"type\":\"work\",\"seq\":3,\"item\":16}\n");
        assert_eq!(
            WorkRequest::from_line(&line).unwrap(),
            WorkRequest::Work {
                seq: 3,
                item: json!(16)
            }
        );
    }

    #[test]
    fn test_exit_is_distinct_from_work() {
        let line = WorkRequest::Exit.to_line().unwrap();
        assert_eq!(line, "{\"type\":\"exit\"}\n");
        assert_eq!(WorkRequest::from_line(&line).unwrap(), WorkRequest::Exit);

        // A null work item is still work
        let null_item = WorkRequest::work(1, Payload::Null).to_line().unwrap();
        assert!(matches!(
            WorkRequest::from_line(&null_item).unwrap(),
            WorkRequest::Work { seq: 1, .. }
        ));
    }

    #[test]
    fn test_failed_result_serializes_null() {
        let line = WorkResponse::result(7, json!(0), None).to_line().unwrap();
        assert!(line.contains("\"result\":null"));
        match WorkResponse::from_line(&line).unwrap() {
            WorkResponse::Result { seq, item, result } => {
                assert_eq!(seq, 7);
                assert_eq!(item, json!(0));
                assert!(result.is_none());
            }
            other => panic!("Expected Result variant, got {:?}", other),
        }
    }

    #[test]
    fn test_ready_carries_identity() {
        let line = WorkResponse::Ready {
            worker_id: 4,
            pid: 1234,
        }
        .to_line()
        .unwrap();
        assert!(matches!(
            WorkResponse::from_line(&line).unwrap(),
            WorkResponse::Ready {
                worker_id: 4,
                pid: 1234
            }
        ));
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(WorkRequest::from_line("{\"type\":\"extract\"}").is_err());
        assert!(WorkResponse::from_line("not json").is_err());
    }
}
