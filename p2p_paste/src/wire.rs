//! Application messages carried inside `normal` channel frames.
//!
//! The set of shapes is closed: anything that does not deserialize into
//! [`WireMessage`] is rejected and dropped by the caller.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Every message a peer may send once the data channel is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WireMessage {
    Chat {
        sent: u64,
        msg: String,
    },
    Rename {
        sent: u64,
        name: String,
    },
    FileSendRequest {
        id: String,
        name: String,
        mime_type: String,
        size: u64,
        sent: u64,
    },
    FileSendAccept {
        id: String,
        sent: u64,
    },
    FileSendReject {
        id: String,
        sent: u64,
    },
    FileSendCancel {
        id: String,
        sent: u64,
    },
    FileSendChunk {
        id: String,
        sent: u64,
        offset: u64,
        end: u64,
        /// Base64 encoded slice `[offset, end)` of the file
        data: String,
    },
    FileSendChunkAck {
        id: String,
        sent: u64,
        end: u64,
    },
}

/// Why an inbound payload was not turned into a [`WireMessage`]
#[derive(Debug, thiserror::Error)]
pub enum ValidationRejection {
    #[error("invalid JSON in wire message: {0}")]
    InvalidJson(serde_json::Error),
    #[error("unexpected wire message: {0}")]
    UnexpectedShape(serde_json::Error),
}

impl WireMessage {
    /// Short tag used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Chat { .. } => "chat",
            WireMessage::Rename { .. } => "rename",
            WireMessage::FileSendRequest { .. } => "fileSendRequest",
            WireMessage::FileSendAccept { .. } => "fileSendAccept",
            WireMessage::FileSendReject { .. } => "fileSendReject",
            WireMessage::FileSendCancel { .. } => "fileSendCancel",
            WireMessage::FileSendChunk { .. } => "fileSendChunk",
            WireMessage::FileSendChunkAck { .. } => "fileSendChunkAck",
        }
    }

    /// File id for transfer messages, `None` for chat and rename
    pub fn file_id(&self) -> Option<&str> {
        match self {
            WireMessage::Chat { .. } | WireMessage::Rename { .. } => None,
            WireMessage::FileSendRequest { id, .. }
            | WireMessage::FileSendAccept { id, .. }
            | WireMessage::FileSendReject { id, .. }
            | WireMessage::FileSendCancel { id, .. }
            | WireMessage::FileSendChunk { id, .. }
            | WireMessage::FileSendChunkAck { id, .. } => Some(id),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parse and validate one inbound wire message.
///
/// JSON syntax is checked first so that garbage and foreign-but-valid
/// JSON can be told apart in the logs.
pub fn parse_wire_message(text: &str) -> Result<WireMessage, ValidationRejection> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(ValidationRejection::InvalidJson)?;
    serde_json::from_value(value).map_err(ValidationRejection::UnexpectedShape)
}

/// Milliseconds since the unix epoch, used for every `sent` field
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
