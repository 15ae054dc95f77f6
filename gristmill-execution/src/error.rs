//! Execution error types and wire-record conversions
//!
//! Worker-side failures cross the boundary as [`ErrorRecord`]s. The
//! constructors here stamp each local error kind with a wire name, and
//! [`ExecutionError::from_record`] rebuilds the matching typed error on the
//! controller. Records whose name matches no local kind become a
//! [`RemoteError`] with every field preserved.

use serde_json::{json, Value as JsonValue};
use std::fmt;
use thiserror::Error;

use gristmill_core::CoreError;
use gristmill_ipc::{ErrorRecord, IpcError};
use gristmill_plugin::PluginError;

/// Execution result type
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Wire names for the typed error kinds.
mod kind {
    pub const INVALID_CONFIG: &str = "InvalidConfig";
    pub const INVALID_FILE: &str = "InvalidFile";
    pub const MODULE_NOT_FOUND: &str = "ModuleNotFound";
    pub const MODULE_IMPORT_FAILED: &str = "ModuleImportFailed";
    pub const INVALID_PROCESSOR: &str = "InvalidProcessor";
    pub const PLUGIN_ERROR: &str = "PluginError";
    pub const POOL_DISPOSED: &str = "PoolDisposed";
    pub const TERMINATING: &str = "Terminating";
    pub const WORKER_ERROR: &str = "WorkerError";
}

/// Errors surfaced by the pool's public API
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The pool was used after `dispose`
    #[error("Worker pool has been disposed")]
    PoolDisposed,

    /// Configuration or file validation failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Plugin import or execution failure
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Channel-level failure: termination, protocol fault, unexpected exit
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// A worker-side failure whose kind has no local counterpart
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Worker thread management failure
    #[error("Worker error: {0}")]
    Worker(String),
}

impl ExecutionError {
    /// Stamp this error into its wire record.
    pub fn to_record(&self, worker_id: usize) -> ErrorRecord {
        match self {
            ExecutionError::Plugin(error) => plugin_record(error, worker_id),
            ExecutionError::Core(CoreError::InvalidFile(value)) => {
                ErrorRecord::new(kind::INVALID_FILE, self.to_string())
                    .with_datum("value", json!(value))
            }
            ExecutionError::Core(error) => {
                ErrorRecord::new(kind::INVALID_CONFIG, error.to_string())
            }
            ExecutionError::Ipc(IpcError::Terminating) => {
                ErrorRecord::new(kind::TERMINATING, self.to_string())
            }
            ExecutionError::Ipc(error) => ErrorRecord::from_error(kind::WORKER_ERROR, error),
            ExecutionError::Remote(remote) => remote.record().clone(),
            ExecutionError::PoolDisposed => {
                ErrorRecord::new(kind::POOL_DISPOSED, self.to_string())
            }
            ExecutionError::Worker(message) => {
                ErrorRecord::new(kind::WORKER_ERROR, message.clone())
            }
        }
    }

    /// Rebuild a typed error from a wire record.
    ///
    /// Known names map back to their local kinds; anything else is
    /// preserved as a [`RemoteError`].
    pub fn from_record(record: ErrorRecord) -> Self {
        match record.name.as_str() {
            kind::MODULE_NOT_FOUND => {
                ExecutionError::Plugin(PluginError::module_not_found(datum_str(
                    &record, "module_id",
                )))
            }
            kind::MODULE_IMPORT_FAILED => {
                let module_id = datum_str(&record, "module_id");
                let cause_message = datum_str(&record, "cause_message");
                let source = match record.data.get("cause").and_then(JsonValue::as_str) {
                    Some(kind::MODULE_NOT_FOUND) => {
                        PluginError::module_not_found(module_id.clone())
                    }
                    Some(kind::INVALID_PROCESSOR) => {
                        PluginError::invalid_processor(cause_message)
                    }
                    Some(name) => PluginError::failed(name, cause_message),
                    None => PluginError::failed(kind::PLUGIN_ERROR, cause_message),
                };
                ExecutionError::Plugin(PluginError::import_failed(module_id, source))
            }
            kind::INVALID_PROCESSOR => {
                ExecutionError::Plugin(PluginError::invalid_processor(datum_str(
                    &record, "detail",
                )))
            }
            kind::INVALID_FILE => {
                ExecutionError::Core(CoreError::InvalidFile(datum_str(&record, "value")))
            }
            kind::TERMINATING => ExecutionError::Ipc(IpcError::Terminating),
            _ => ExecutionError::Remote(RemoteError::from(record)),
        }
    }
}

fn datum_str(record: &ErrorRecord, key: &str) -> String {
    record
        .data
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or(&record.message)
        .to_string()
}

fn plugin_record(error: &PluginError, worker_id: usize) -> ErrorRecord {
    match error {
        PluginError::ModuleNotFound { module_id } => {
            ErrorRecord::new(kind::MODULE_NOT_FOUND, error.to_string())
                .with_datum("worker_id", json!(worker_id))
                .with_datum("module_id", json!(module_id))
        }
        PluginError::ImportFailed { module_id, source } => {
            let cause = plugin_record(source, worker_id);
            ErrorRecord::from_error(kind::MODULE_IMPORT_FAILED, error)
                .with_datum("worker_id", json!(worker_id))
                .with_datum("module_id", json!(module_id))
                .with_datum("cause", json!(cause.name))
                .with_datum("cause_message", json!(cause.message))
        }
        PluginError::InvalidProcessor(detail) => {
            ErrorRecord::new(kind::INVALID_PROCESSOR, error.to_string())
                .with_datum("detail", json!(detail))
        }
        PluginError::Failed {
            name,
            message,
            data,
        } => {
            let mut record = ErrorRecord::new(name.clone(), message.clone());
            match data {
                Some(JsonValue::Object(map)) => record.data = map.clone(),
                Some(value) => record = record.with_datum("data", value.clone()),
                None => {}
            }
            record
        }
        PluginError::Library(_) | PluginError::Io(_) => {
            ErrorRecord::from_error(kind::PLUGIN_ERROR, error)
        }
    }
}

/// A failure reconstructed from a worker's error record.
///
/// Name, message, stack, and custom data fields are preserved verbatim.
#[derive(Debug, Clone)]
pub struct RemoteError {
    record: ErrorRecord,
}

impl RemoteError {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn message(&self) -> &str {
        &self.record.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.record.stack.as_deref()
    }

    pub fn data(&self) -> &serde_json::Map<String, JsonValue> {
        &self.record.data
    }

    pub fn record(&self) -> &ErrorRecord {
        &self.record
    }
}

impl From<ErrorRecord> for RemoteError {
    fn from(record: ErrorRecord) -> Self {
        Self { record }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record.message)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_not_found_round_trip() {
        let error: ExecutionError = PluginError::module_not_found("markdown").into();
        let record = error.to_record(3);

        assert_eq!(record.name, "ModuleNotFound");
        assert_eq!(record.data["worker_id"], json!(3));
        assert_eq!(record.data["module_id"], json!("markdown"));

        match ExecutionError::from_record(record) {
            ExecutionError::Plugin(PluginError::ModuleNotFound { module_id }) => {
                assert_eq!(module_id, "markdown");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_import_failed_round_trip_keeps_inner_kind() {
        let error: ExecutionError = PluginError::import_failed(
            "non-existent",
            PluginError::module_not_found("non-existent"),
        )
        .into();
        let record = error.to_record(0);
        assert_eq!(record.data["cause"], json!("ModuleNotFound"));

        match ExecutionError::from_record(record) {
            ExecutionError::Plugin(PluginError::ImportFailed { module_id, source }) => {
                assert_eq!(module_id, "non-existent");
                assert!(matches!(*source, PluginError::ModuleNotFound { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_processor_round_trip_keeps_detail() {
        let error: ExecutionError =
            PluginError::invalid_processor("The module exported 3.141592653589793").into();
        let rebuilt = ExecutionError::from_record(error.to_record(0));

        match rebuilt {
            ExecutionError::Plugin(PluginError::InvalidProcessor(detail)) => {
                assert_eq!(detail, "The module exported 3.141592653589793");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_custom_failure_survives_as_remote_error() {
        let error: ExecutionError = PluginError::failed_with(
            "WriteError",
            "disk full",
            json!({"code": "ENOSPC", "path": "/out/a.txt"}),
        )
        .into();
        let record = error.to_record(1);

        match ExecutionError::from_record(record) {
            ExecutionError::Remote(remote) => {
                assert_eq!(remote.name(), "WriteError");
                assert_eq!(remote.message(), "disk full");
                assert_eq!(remote.data()["code"], json!("ENOSPC"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_terminating_round_trip() {
        let error: ExecutionError = IpcError::Terminating.into();
        let rebuilt = ExecutionError::from_record(error.to_record(0));
        assert!(matches!(
            rebuilt,
            ExecutionError::Ipc(IpcError::Terminating)
        ));
    }

    #[test]
    fn test_invalid_file_round_trip() {
        let error: ExecutionError = CoreError::InvalidFile("\"\"".to_string()).into();
        let record = error.to_record(0);
        assert!(record.message.contains("Invalid output file:"));

        let rebuilt = ExecutionError::from_record(record);
        assert!(rebuilt.to_string().contains("Invalid output file:"));
    }
}
