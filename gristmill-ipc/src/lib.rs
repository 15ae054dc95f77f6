//! Message channel between the Gristmill pool controller and its workers
//!
//! This crate provides the message protocol, the value transport that
//! detaches files and run contexts for a boundary crossing, and the duplex
//! channel with correlated and streamed replies.

pub mod channel;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use channel::{ChannelEvent, ExecutorEndpoint, MessageChannel, ReplyStream};
pub use error::{IpcError, IpcResult};
pub use protocol::{
    next_message_id, ErrorRecord, MessageId, Reply, ReplyEnvelope, Request, RequestEnvelope,
};
pub use transport::{FileSnapshot, RunSnapshot};
