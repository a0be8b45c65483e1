use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

use super::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedFileStatus {
    Requested,
    Accepted,
    Rejected,
    Cancelled,
    Receiving,
    Received,
    Failed,
}

impl fmt::Display for ReceivedFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReceivedFileStatus::Requested => "requested",
            ReceivedFileStatus::Accepted => "accepted",
            ReceivedFileStatus::Rejected => "rejected",
            ReceivedFileStatus::Cancelled => "cancelled",
            ReceivedFileStatus::Receiving => "receiving",
            ReceivedFileStatus::Received => "received",
            ReceivedFileStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of applying an inbound chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk stored; acknowledge `end`
    Accepted { end: u64, complete: bool },
    /// Chunk for a transfer we cancelled or rejected; drop it silently
    Stale,
}

/// A file the peer offered us
#[derive(Debug, Clone)]
pub struct ReceivedFileState {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    status: ReceivedFileStatus,
    last_accepted_offset: u64,
    received_chunks: Vec<Vec<u8>>,
    assembled_contents: Option<Vec<u8>>,
    error: Option<String>,
}

impl ReceivedFileState {
    pub fn new(id: String, file_name: String, mime_type: String, total_size: u64) -> Self {
        Self {
            id,
            file_name,
            mime_type,
            total_size,
            status: ReceivedFileStatus::Requested,
            last_accepted_offset: 0,
            received_chunks: Vec::new(),
            assembled_contents: None,
            error: None,
        }
    }

    pub fn status(&self) -> ReceivedFileStatus {
        self.status
    }

    pub fn last_accepted_offset(&self) -> u64 {
        self.last_accepted_offset
    }

    /// Decoded chunks in arrival order
    pub fn received_chunks(&self) -> &[Vec<u8>] {
        &self.received_chunks
    }

    pub fn assembled_contents(&self) -> Option<&[u8]> {
        self.assembled_contents.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> f32 {
        if self.total_size == 0 {
            return if self.status == ReceivedFileStatus::Received { 1.0 } else { 0.0 };
        }
        self.last_accepted_offset as f32 / self.total_size as f32
    }

    pub fn check_accept(&self) -> Result<(), TransferError> {
        if self.status != ReceivedFileStatus::Requested {
            return Err(self.invalid("accept"));
        }
        Ok(())
    }

    pub fn accept(&mut self) -> Result<(), TransferError> {
        self.check_accept()?;
        self.status = ReceivedFileStatus::Accepted;
        Ok(())
    }

    pub fn check_reject(&self) -> Result<(), TransferError> {
        if !matches!(
            self.status,
            ReceivedFileStatus::Requested | ReceivedFileStatus::Receiving
        ) {
            return Err(self.invalid("reject"));
        }
        Ok(())
    }

    pub fn reject(&mut self) -> Result<(), TransferError> {
        self.check_reject()?;
        self.status = ReceivedFileStatus::Rejected;
        self.received_chunks.clear();
        Ok(())
    }

    /// Sender withdrew the offer; returns false if the notice was stale
    pub fn on_cancel(&mut self) -> bool {
        if !matches!(
            self.status,
            ReceivedFileStatus::Requested
                | ReceivedFileStatus::Accepted
                | ReceivedFileStatus::Receiving
        ) {
            return false;
        }
        self.status = ReceivedFileStatus::Cancelled;
        self.received_chunks.clear();
        true
    }

    /// Apply `[offset, end)` of the file.
    ///
    /// The chunk must start exactly at the last accepted offset and its
    /// decoded data must cover exactly `end - offset` bytes. Any violation
    /// fails the transfer and leaves the offset and chunk log untouched.
    pub fn on_chunk(&mut self, offset: u64, end: u64, data: String) -> Result<ChunkOutcome, TransferError> {
        match self.status {
            ReceivedFileStatus::Accepted | ReceivedFileStatus::Receiving => {}
            ReceivedFileStatus::Cancelled
            | ReceivedFileStatus::Rejected
            | ReceivedFileStatus::Failed => return Ok(ChunkOutcome::Stale),
            _ => return Err(self.violation(format!("chunk while {}", self.status))),
        }

        if offset != self.last_accepted_offset {
            return Err(self.violation(format!(
                "chunk offset {} does not match expected offset {}",
                offset, self.last_accepted_offset
            )));
        }
        if end > self.total_size {
            return Err(self.violation(format!(
                "chunk end {} is beyond file size {}",
                end, self.total_size
            )));
        }
        if end < offset || (end == offset && self.total_size != 0) {
            return Err(self.violation(format!("empty or inverted chunk [{}, {})", offset, end)));
        }

        let bytes = match STANDARD.decode(&data) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.violation(format!("chunk is not valid base64: {}", e))),
        };
        if bytes.len() as u64 != end - offset {
            return Err(self.violation(format!(
                "chunk [{}, {}) carries {} bytes",
                offset,
                end,
                bytes.len()
            )));
        }

        self.received_chunks.push(bytes);
        self.last_accepted_offset = end;
        self.status = ReceivedFileStatus::Receiving;

        let complete = end >= self.total_size;
        if complete {
            self.assemble()?;
        }
        Ok(ChunkOutcome::Accepted { end, complete })
    }

    fn assemble(&mut self) -> Result<(), TransferError> {
        // Sized from what arrived, never from the announced size
        let received: usize = self.received_chunks.iter().map(Vec::len).sum();
        let mut contents = Vec::with_capacity(received);
        for chunk in &self.received_chunks {
            contents.extend_from_slice(chunk);
        }

        if contents.len() as u64 != self.total_size {
            return Err(self.violation(format!(
                "assembled {} bytes, expected {}",
                contents.len(),
                self.total_size
            )));
        }

        self.assembled_contents = Some(contents);
        self.received_chunks.clear();
        self.status = ReceivedFileStatus::Received;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> TransferError {
        TransferError::InvalidState {
            id: self.id.clone(),
            action,
            status: self.status.to_string(),
        }
    }

    fn violation(&mut self, reason: String) -> TransferError {
        self.status = ReceivedFileStatus::Failed;
        self.error = Some(reason.clone());
        TransferError::Violation {
            id: self.id.clone(),
            reason,
        }
    }
}
