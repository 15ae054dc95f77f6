//! Core data model for the Gristmill file-processing worker pool
//!
//! This crate defines the types that cross the worker boundary: files and
//! their contents, change records, the per-build run context, and the run
//! logger capability that routes plugin log records back to the build
//! engine.

pub mod error;
pub mod file;
pub mod logger;
pub mod run;
pub mod validation;

// Re-export commonly used types
pub use error::{CoreError, CoreResult};
pub use file::{ChangeKind, ChangedFile, File, FileContents, FileInfo};
pub use logger::{LogLevel, LogMessage, NullRunLogger, RunLogger, TracingRunLogger};
pub use run::{BuildScope, Run};
pub use validation::{validate_positive, validate_required_string, Validatable};
