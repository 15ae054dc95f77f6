//! Plugin system error types

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Plugin system result type
pub type PluginResult<T> = Result<T, PluginError>;

/// Plugin system errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// No resolver knows the module
    #[error("Module '{module_id}' not found")]
    ModuleNotFound { module_id: String },

    /// Resolution or loading failed for an imported module
    #[error("Error importing module: {module_id}: {source}")]
    ImportFailed {
        module_id: String,
        #[source]
        source: Box<PluginError>,
    },

    /// The module loaded but its export cannot act as a file processor
    #[error("Invalid file processor: {0}")]
    InvalidProcessor(String),

    /// Dynamic library loading failed
    #[error("Module library error: {0}")]
    Library(#[from] libloading::Error),

    /// Failure raised by plugin code, with custom properties
    #[error("{message}")]
    Failed {
        name: String,
        message: String,
        data: Option<JsonValue>,
    },

    /// IO error inside plugin code
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Create a module-not-found error
    pub fn module_not_found(module_id: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module_id: module_id.into(),
        }
    }

    /// Wrap an error that occurred while importing a module
    pub fn import_failed(module_id: impl Into<String>, source: PluginError) -> Self {
        Self::ImportFailed {
            module_id: module_id.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid-processor error
    pub fn invalid_processor(message: impl Into<String>) -> Self {
        Self::InvalidProcessor(message.into())
    }

    /// Create a plugin failure with a declared name
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Create a plugin failure carrying custom properties
    pub fn failed_with(
        name: impl Into<String>,
        message: impl Into<String>,
        data: JsonValue,
    ) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
            data: Some(data),
        }
    }
}
