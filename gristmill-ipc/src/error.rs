//! IPC error types

use thiserror::Error;

/// IPC result type
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors raised by the message channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// The request was cancelled because the worker is being terminated
    #[error("Worker is terminating")]
    Terminating,

    /// The worker thread exited without being asked to
    #[error("Worker {worker_id} exited unexpectedly with code {code}")]
    UnexpectedExit { worker_id: usize, code: i32 },

    /// The channel to the worker is gone
    #[error("Message channel closed")]
    ChannelClosed,

    /// A reply referenced a message id with no pending waiter
    #[error("Reply for unknown message id {id}")]
    Protocol { id: u64 },
}

impl IpcError {
    /// Whether this error means the worker is gone for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::Terminating | IpcError::UnexpectedExit { .. } | IpcError::ChannelClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_exit_display() {
        let error = IpcError::UnexpectedExit {
            worker_id: 2,
            code: 101,
        };
        assert_eq!(
            error.to_string(),
            "Worker 2 exited unexpectedly with code 101"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IpcError::Terminating.is_fatal());
        assert!(IpcError::ChannelClosed.is_fatal());
        assert!(!IpcError::Protocol { id: 7 }.is_fatal());
    }
}
