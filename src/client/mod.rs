//! Detector device API surface.
//!
//! The detector is controlled over a request/response API organized into
//! subsystems: system commands, detector commands, detector configuration,
//! detector status, and the file writer. [`DeviceClient`] captures exactly
//! that surface so the orchestrator can be driven against the real HTTP
//! transport or the scriptable mock interchangeably.
//!
//! All parameter values travel as JSON (`serde_json::Value`); the device
//! wraps scalar reads in a `{"value": ...}` mapping, which the transports
//! unwrap before returning.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::error::AppResult;

pub use http::SimplonClient;
pub use mock::MockDetector;

/// Reply to a detector command (`arm`, `trigger`, `disarm`, ...).
///
/// Arm, trigger and disarm answer with a mapping carrying a `sequence id`
/// identifying the exposure run; other commands answer with an empty body.
/// The id's value encodes phase-specific success: arm and disarm report a
/// non-negative id, while trigger reports the completion sentinel `-1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    /// `sequence id` from the reply mapping, when one was present.
    pub sequence_id: Option<i64>,
}

impl CommandReply {
    /// Parse a command reply body. An empty or non-mapping body is a valid
    /// reply with no sequence id.
    pub fn from_body(body: Option<&Value>) -> Self {
        let sequence_id = body
            .and_then(|v| v.get("sequence id"))
            .and_then(Value::as_i64);
        Self { sequence_id }
    }
}

/// Request/response client for the detector control unit.
///
/// Implementations must be cheap to share (`&self` methods only); the
/// orchestrator serializes calls through its communication gate, not
/// through the client.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Issue a system-level command (`restart`).
    async fn system_command(&self, command: &str) -> AppResult<CommandReply>;

    /// Issue a detector command (`initialize`, `arm`, `trigger`, `disarm`).
    async fn detector_command(&self, command: &str) -> AppResult<CommandReply>;

    /// Write a detector configuration key.
    async fn set_detector_config(&self, key: &str, value: Value) -> AppResult<()>;

    /// Read a detector configuration key.
    async fn detector_config(&self, key: &str) -> AppResult<Value>;

    /// Read a detector status key (`state`, `temperature`, `time`, ...).
    async fn detector_status(&self, key: &str) -> AppResult<Value>;

    /// Write a file writer configuration key.
    async fn set_filewriter_config(&self, key: &str, value: Value) -> AppResult<()>;

    /// Issue a file writer command (`clear`).
    async fn filewriter_command(&self, command: &str) -> AppResult<()>;

    /// List the files currently held in the detector's data store.
    async fn filewriter_files(&self) -> AppResult<Vec<String>>;

    /// Download one file from the data store into `destination`.
    async fn filewriter_save(&self, filename: &str, destination: &Path) -> AppResult<()>;

    /// Write a monitor interface configuration key.
    async fn set_monitor_config(&self, key: &str, value: Value) -> AppResult<()>;

    /// Write a stream interface configuration key.
    async fn set_stream_config(&self, key: &str, value: Value) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_reply_parses_sequence_id() {
        let body = json!({ "sequence id": 3 });
        let reply = CommandReply::from_body(Some(&body));
        assert_eq!(reply.sequence_id, Some(3));
    }

    #[test]
    fn test_command_reply_without_body() {
        assert_eq!(CommandReply::from_body(None).sequence_id, None);
        let body = json!("ok");
        assert_eq!(CommandReply::from_body(Some(&body)).sequence_id, None);
    }
}
