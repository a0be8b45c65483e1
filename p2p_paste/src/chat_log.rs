//! Append-only timeline shown by the UI.

use serde::Serialize;

/// Which side produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LocalMessage {
    Chat {
        origin: Origin,
        sent: u64,
        msg: String,
    },
    Rename {
        origin: Origin,
        sent: u64,
        name: String,
    },
    ChatStarted {
        at: u64,
    },
    Disconnected {
        at: u64,
    },
    /// Echo of a file we offered; its progress lives in the transfer engine
    FileSend {
        file_id: String,
    },
    /// Echo of a file the peer offered
    FileRecv {
        file_id: String,
    },
}

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<LocalMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index
    pub fn push(&mut self, entry: LocalMessage) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[LocalMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent name the peer announced, if any
    pub fn peer_name(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match entry {
            LocalMessage::Rename {
                origin: Origin::Remote,
                name,
                ..
            } => Some(name.as_str()),
            _ => None,
        })
    }
}
