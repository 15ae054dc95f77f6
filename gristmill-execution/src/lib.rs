//! Worker pool execution engine for Gristmill
//!
//! This crate runs plugin file processors in parallel across a fixed set of
//! worker threads. The [`WorkerPool`] registers processor modules on every
//! worker, hands out named [`ProcessorProxy`]s that dispatch round-robin,
//! and streams each call's output files back to the caller while routing
//! worker-side log records to the originating run.

pub mod error;
mod executor;
pub mod pool;
pub mod worker;

// Re-export main types
pub use error::{ExecutionError, ExecutionResult, RemoteError};
pub use pool::{ModuleRequest, PoolOptions, ProcessorProxy, WorkerPool};
pub use worker::{FileStream, WorkerHandle, WorkerState};
