use crate::channel::RenegotiationError;
use crate::connection::ConnectionState;
use crate::signaling::{DecodeError, EncodeError};
use crate::transfer::TransferError;
use crate::transport::TransportError;

/// Errors returned by [`crate::Session`] operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Pasted token is invalid or corrupted; ask the peer for a new one
    #[error("invalid invitation or response: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to build token: {0}")]
    Encode(#[from] EncodeError),
    /// Scoped to one file, the session carries on
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Renegotiation(#[from] RenegotiationError),
    #[error("operation not allowed while {0}")]
    WrongState(ConnectionState),
    #[error("no invitation is waiting for a response")]
    NoPendingResponse,
    #[error("failed to encode wire message: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
