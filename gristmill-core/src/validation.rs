//! Configuration validation traits and utilities

use crate::error::{CoreError, CoreResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> CoreResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_config(self.domain_name(), message)
    }
}

/// Validate a required string field, rejecting blank values
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::invalid_config(
            domain,
            format!("{} cannot be empty", field_name),
        ));
    }
    Ok(())
}

/// Validate a positive count
pub fn validate_positive(value: usize, field_name: &str, domain: &str) -> CoreResult<()> {
    if value == 0 {
        return Err(CoreError::invalid_config(
            domain,
            format!("{} must be greater than 0", field_name),
        ));
    }
    Ok(())
}
