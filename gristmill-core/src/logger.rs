//! Per-run logging capability
//!
//! A [`RunLogger`] travels with every [`Run`](crate::run::Run). On the
//! controller side it forwards to the build engine's logger; inside a worker
//! it is replaced by one that tunnels records back over the message channel
//! to the originating request.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Severity of a run log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Payload of a run log record: plain text or a failure carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogMessage {
    Text {
        text: String,
    },
    Failure {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

impl LogMessage {
    pub fn text(text: impl Into<String>) -> Self {
        LogMessage::Text { text: text.into() }
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        LogMessage::Failure {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogMessage::Text { text } => write!(f, "{}", text),
            LogMessage::Failure { name, message, .. } => write!(f, "{}: {}", name, message),
        }
    }
}

/// Capability through which a processor reports progress for one run.
pub trait RunLogger: Send + Sync {
    /// Record one log entry.
    fn log(&self, level: LogLevel, message: LogMessage, data: Option<JsonValue>);

    /// Record a message, routing failures to the error level and plain text
    /// to the info level.
    fn record(&self, message: LogMessage, data: Option<JsonValue>) {
        let level = match &message {
            LogMessage::Text { .. } => LogLevel::Info,
            LogMessage::Failure { .. } => LogLevel::Error,
        };
        self.log(level, message, data);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, LogMessage::text(message), None);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, LogMessage::text(message), None);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, LogMessage::text(message), None);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, LogMessage::text(message), None);
    }
}

/// Forwards run records to the process-wide `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLogger;

impl RunLogger for TracingRunLogger {
    fn log(&self, level: LogLevel, message: LogMessage, data: Option<JsonValue>) {
        let data = data.map(|value| value.to_string());
        let data = data.as_deref();
        match level {
            LogLevel::Debug => {
                tracing::debug!(target: "gristmill::run", data, "{}", message)
            }
            LogLevel::Info => {
                tracing::info!(target: "gristmill::run", data, "{}", message)
            }
            LogLevel::Warning => {
                tracing::warn!(target: "gristmill::run", data, "{}", message)
            }
            LogLevel::Error => {
                tracing::error!(target: "gristmill::run", data, "{}", message)
            }
        }
    }
}

/// Discards every record. Useful as a default in tests and tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunLogger;

impl RunLogger for NullRunLogger {
    fn log(&self, _level: LogLevel, _message: LogMessage, _data: Option<JsonValue>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingLogger {
        records: Mutex<Vec<(LogLevel, LogMessage)>>,
    }

    impl RunLogger for CapturingLogger {
        fn log(&self, level: LogLevel, message: LogMessage, _data: Option<JsonValue>) {
            self.records
                .lock()
                .expect("record lock poisoned")
                .push((level, message));
        }
    }

    #[test]
    fn test_record_routes_by_message_kind() {
        let logger = CapturingLogger::default();
        logger.record(LogMessage::text("starting"), None);
        logger.record(LogMessage::failure("ReadError", "missing file"), None);

        let records = logger.records.lock().unwrap();
        assert_eq!(records[0].0, LogLevel::Info);
        assert_eq!(records[1].0, LogLevel::Error);
    }

    #[test]
    fn test_named_severities() {
        let logger = CapturingLogger::default();
        logger.debug("d");
        logger.info("i");
        logger.warn("w");
        logger.error("e");

        let records = logger.records.lock().unwrap();
        let levels: Vec<LogLevel> = records.iter().map(|(level, _)| *level).collect();
        assert_eq!(
            levels,
            vec![
                LogLevel::Debug,
                LogLevel::Info,
                LogLevel::Warning,
                LogLevel::Error
            ]
        );
    }

    #[test]
    fn test_log_level_serde_names() {
        let json = serde_json::to_string(&LogLevel::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }

    #[test]
    fn test_log_message_display() {
        assert_eq!(LogMessage::text("hello").to_string(), "hello");
        assert_eq!(
            LogMessage::failure("ReadError", "missing").to_string(),
            "ReadError: missing"
        );
    }
}
