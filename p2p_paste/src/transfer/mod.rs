//! Chunked file transfer over the data channel.
//!
//! This module provides:
//! - Outgoing file state with step-lock flow control (one chunk in flight)
//! - Incoming file state with strict in-order chunk acceptance
//! - The engine mapping wire messages to state changes and replies

pub mod constants;
pub mod engine;
pub mod incoming;
pub mod outgoing;

// Re-export public API
pub use constants::CHUNK_SIZE;
pub use engine::FileTransferEngine;
pub use incoming::{ReceivedFileState, ReceivedFileStatus};
pub use outgoing::{SentFileState, SentFileStatus};

/// Errors scoped to one file; they never end the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unknown file id {0}")]
    UnknownFile(String),
    #[error("file id {0} is already in use")]
    DuplicateFile(String),
    #[error("file {id} is too large: {size} bytes (max {max})")]
    TooLarge { id: String, size: u64, max: u64 },
    #[error("cannot {action} file {id} while it is {status}")]
    InvalidState {
        id: String,
        action: &'static str,
        status: String,
    },
    #[error("protocol violation on file {id}: {reason}")]
    Violation { id: String, reason: String },
}
