//! Message protocol between the controller and worker executors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use gristmill_core::{LogLevel, LogMessage};

use crate::transport::{FileSnapshot, RunSnapshot};

/// Correlates requests with their replies. Process-wide monotonic.
pub type MessageId = u64;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide message id.
pub fn next_message_id() -> MessageId {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Envelope stamped on every outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: MessageId,
    pub request: Request,
}

/// Envelope carried by every reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Id of the request this reply answers. Lifecycle notifications
    /// carry none.
    pub to: Option<MessageId>,
    pub reply: Reply,
}

/// Requests sent from the controller to a worker executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Import a processor module and register it under a pool-scoped uid
    ImportFileProcessor {
        module_uid: u64,
        module_id: String,
        cwd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
    },

    /// Import a module for its side effects only
    ImportModule {
        module_id: String,
        cwd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
    },

    /// Run a registered processor over one file
    ProcessFile {
        module_uid: u64,
        file: FileSnapshot,
        run: RunSnapshot,
    },
}

/// Replies sent from a worker executor back to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Lifecycle notification: the executor is ready for requests
    Online,

    /// Terminal reply to `ImportFileProcessor`
    FileProcessorImported { name: String },

    /// Terminal reply closing a request or stream
    Finished,

    /// One produced output file
    File { file: FileSnapshot },

    /// A log record tunnelled back to the originating request
    Log {
        level: LogLevel,
        message: LogMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
    },

    /// Terminal reply rejecting the request
    Error { error: ErrorRecord },
}

impl Reply {
    /// True for replies that close their request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Reply::FileProcessorImported { .. } | Reply::Finished | Reply::Error { .. }
        )
    }
}

/// Wire form of an error: name, message, stack, and custom properties.
///
/// Errors cross the boundary as records rather than opaque objects, so
/// custom properties survive the round trip. The receiving side rebuilds a
/// typed error when the name matches a known kind and a generic one
/// otherwise; `stack` is preserved verbatim either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, JsonValue>,
}

impl ErrorRecord {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            data: Map::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_datum(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Capture an error, recording its source chain as the stack.
    pub fn from_error(name: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut record = Self::new(name, error.to_string());
        let mut frames = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            frames.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        if !frames.is_empty() {
            record.stack = Some(frames.join("\n"));
        }
        record
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_are_monotonic() {
        let first = next_message_id();
        let second = next_message_id();
        assert!(second > first);
        assert!(first > 0);
    }

    #[test]
    fn test_request_serde_round_trip() {
        let request = Request::ImportFileProcessor {
            module_uid: 3,
            module_id: "markdown".to_string(),
            cwd: "/build".to_string(),
            data: Some(json!({"gfm": true})),
        };

        let json = serde_json::to_string(&RequestEnvelope { id: 9, request }).unwrap();
        assert!(json.contains("\"import_file_processor\""));

        let envelope: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope.id, 9);
        match envelope.request {
            Request::ImportFileProcessor {
                module_uid,
                module_id,
                ..
            } => {
                assert_eq!(module_uid, 3);
                assert_eq!(module_id, "markdown");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_reply_terminality() {
        assert!(Reply::Finished.is_terminal());
        assert!(Reply::FileProcessorImported {
            name: "markdown".to_string()
        }
        .is_terminal());
        assert!(Reply::Error {
            error: ErrorRecord::new("PluginError", "boom")
        }
        .is_terminal());
        assert!(!Reply::Online.is_terminal());
        assert!(!Reply::Log {
            level: LogLevel::Info,
            message: LogMessage::text("working"),
            data: None,
        }
        .is_terminal());
    }

    #[test]
    fn test_error_record_captures_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);

        let record = ErrorRecord::from_error("ReadError", &outer);
        assert_eq!(record.name, "ReadError");
        assert!(record.stack.as_deref().unwrap().contains("missing"));
    }

    #[test]
    fn test_error_record_custom_fields_survive_serde() {
        let record = ErrorRecord::new("WriteError", "disk full")
            .with_stack("caused by: ENOSPC")
            .with_datum("code", json!("ENOSPC"))
            .with_datum("path", json!("/out/a.txt"));

        let json = serde_json::to_string(&record).unwrap();
        let back: ErrorRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, record);
        assert_eq!(back.data["code"], json!("ENOSPC"));
        assert_eq!(back.stack.as_deref(), Some("caused by: ENOSPC"));
    }
}
