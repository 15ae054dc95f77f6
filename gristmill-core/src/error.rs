//! Core error types

use thiserror::Error;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core errors
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Configuration rejected during validation
    #[error("Invalid {domain} configuration: {message}")]
    InvalidConfig { domain: String, message: String },

    /// A processor produced an output that is not a usable file
    #[error("Invalid output file: {0}")]
    InvalidFile(String),
}

impl CoreError {
    /// Create a new configuration error for the given domain
    pub fn invalid_config(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            domain: domain.into(),
            message: message.into(),
        }
    }
}
