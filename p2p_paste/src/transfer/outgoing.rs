use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

use super::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentFileStatus {
    /// Offer sent, waiting for the peer to accept
    Requested,
    Accepted,
    Rejected,
    Cancelled,
    Sending,
    /// Last chunk sent, final ack outstanding
    Sent,
    /// Peer acknowledged the last chunk
    Received,
    /// Aborted after a protocol violation
    Failed,
}

impl fmt::Display for SentFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SentFileStatus::Requested => "requested",
            SentFileStatus::Accepted => "accepted",
            SentFileStatus::Rejected => "rejected",
            SentFileStatus::Cancelled => "cancelled",
            SentFileStatus::Sending => "sending",
            SentFileStatus::Sent => "sent",
            SentFileStatus::Received => "received",
            SentFileStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of applying an inbound ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// More data to send
    Continue,
    /// Final chunk acknowledged
    Complete,
    /// Ack for a transfer we already cancelled or that was rejected
    Stale,
}

/// Slice of the file ready to go on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChunk {
    pub offset: u64,
    pub end: u64,
    pub data: String,
}

/// A file we offered to the peer.
///
/// Invariant: `ack_offset <= sent_offset <= total_size`, and at most one
/// chunk is unacknowledged at any time.
#[derive(Debug, Clone)]
pub struct SentFileState {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    sent_offset: u64,
    ack_offset: u64,
    awaiting_ack: bool,
    status: SentFileStatus,
    error: Option<String>,
    contents: Vec<u8>,
}

impl SentFileState {
    pub fn new(id: String, file_name: String, mime_type: String, contents: Vec<u8>) -> Self {
        Self {
            id,
            file_name,
            mime_type,
            total_size: contents.len() as u64,
            sent_offset: 0,
            ack_offset: 0,
            awaiting_ack: false,
            status: SentFileStatus::Requested,
            error: None,
            contents,
        }
    }

    pub fn status(&self) -> SentFileStatus {
        self.status
    }

    pub fn sent_offset(&self) -> u64 {
        self.sent_offset
    }

    pub fn ack_offset(&self) -> u64 {
        self.ack_offset
    }

    /// Reason the transfer failed, if it did
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Fraction of the file acknowledged by the peer
    pub fn progress(&self) -> f32 {
        if self.total_size == 0 {
            return if self.status == SentFileStatus::Received { 1.0 } else { 0.0 };
        }
        self.ack_offset as f32 / self.total_size as f32
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            SentFileStatus::Received
                | SentFileStatus::Rejected
                | SentFileStatus::Cancelled
                | SentFileStatus::Failed
        )
    }

    pub fn on_accept(&mut self) -> Result<(), TransferError> {
        if self.status != SentFileStatus::Requested {
            return Err(self.invalid("accept"));
        }
        self.status = SentFileStatus::Accepted;
        Ok(())
    }

    /// Next chunk to send, or `None` while an ack is outstanding or the
    /// transfer is not in a sending state
    pub fn next_chunk(&self, chunk_size: usize) -> Option<OutgoingChunk> {
        if !matches!(
            self.status,
            SentFileStatus::Accepted | SentFileStatus::Sending
        ) || self.awaiting_ack
            || self.ack_offset != self.sent_offset
        {
            return None;
        }

        let offset = self.sent_offset;
        let end = (offset + chunk_size as u64).min(self.total_size);
        let data = STANDARD.encode(&self.contents[offset as usize..end as usize]);
        Some(OutgoingChunk { offset, end, data })
    }

    /// Record that `[sent_offset, end)` went out on the channel
    pub fn on_sent(&mut self, end: u64) -> Result<(), TransferError> {
        if !matches!(
            self.status,
            SentFileStatus::Accepted | SentFileStatus::Sending
        ) || self.awaiting_ack
        {
            return Err(self.invalid("send a chunk of"));
        }
        if end > self.total_size || end < self.sent_offset {
            return Err(self.invalid("send a chunk of"));
        }
        // Only a zero-byte file may send an empty chunk
        if end == self.sent_offset && self.total_size != 0 {
            return Err(self.invalid("send an empty chunk of"));
        }

        self.sent_offset = end;
        self.awaiting_ack = true;
        self.status = if end == self.total_size {
            SentFileStatus::Sent
        } else {
            SentFileStatus::Sending
        };
        Ok(())
    }

    /// Apply the peer's ack for the outstanding chunk.
    ///
    /// Anything but `end == sent_offset` with a chunk in flight aborts
    /// the transfer; offsets are left untouched.
    pub fn on_ack(&mut self, end: u64) -> Result<AckOutcome, TransferError> {
        match self.status {
            SentFileStatus::Sending | SentFileStatus::Sent => {}
            SentFileStatus::Cancelled | SentFileStatus::Rejected | SentFileStatus::Failed => {
                return Ok(AckOutcome::Stale);
            }
            _ => return Err(self.violation(format!("ack while {}", self.status))),
        }

        if end < self.ack_offset {
            return Err(self.violation(format!(
                "ack end {} is behind acknowledged offset {}",
                end, self.ack_offset
            )));
        }
        if end > self.sent_offset {
            return Err(self.violation(format!(
                "ack end {} is beyond sent offset {}",
                end, self.sent_offset
            )));
        }
        if !self.awaiting_ack || end != self.sent_offset {
            return Err(self.violation(format!(
                "unexpected ack end {} (sent offset {})",
                end, self.sent_offset
            )));
        }

        self.ack_offset = end;
        self.awaiting_ack = false;

        if self.status == SentFileStatus::Sent {
            self.status = SentFileStatus::Received;
            self.contents = Vec::new();
            Ok(AckOutcome::Complete)
        } else {
            Ok(AckOutcome::Continue)
        }
    }

    /// Whether a local cancel is allowed right now
    pub fn check_cancel(&self) -> Result<(), TransferError> {
        if !matches!(
            self.status,
            SentFileStatus::Requested | SentFileStatus::Accepted | SentFileStatus::Sending
        ) {
            return Err(self.invalid("cancel"));
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransferError> {
        self.check_cancel()?;
        self.status = SentFileStatus::Cancelled;
        self.contents = Vec::new();
        Ok(())
    }

    /// Peer declined or aborted; returns false if the reject was stale
    pub fn on_reject(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.status = SentFileStatus::Rejected;
        self.contents = Vec::new();
        true
    }

    fn invalid(&self, action: &'static str) -> TransferError {
        TransferError::InvalidState {
            id: self.id.clone(),
            action,
            status: self.status.to_string(),
        }
    }

    fn violation(&mut self, reason: String) -> TransferError {
        self.status = SentFileStatus::Failed;
        self.error = Some(reason.clone());
        self.contents = Vec::new();
        TransferError::Violation {
            id: self.id.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(size: usize) -> SentFileState {
        SentFileState::new(
            "f1".to_string(),
            "blob.bin".to_string(),
            "application/octet-stream".to_string(),
            vec![7u8; size],
        )
    }

    fn assert_invariant(state: &SentFileState) {
        assert!(state.ack_offset() <= state.sent_offset());
        assert!(state.sent_offset() <= state.total_size);
    }

    #[test]
    fn test_no_chunk_before_accept() {
        let state = file(100);
        assert_eq!(state.next_chunk(8), None);
    }

    #[test]
    fn test_step_lock_sequence() {
        let mut state = file(20);
        state.on_accept().unwrap();

        let mut ends = Vec::new();
        while let Some(chunk) = state.next_chunk(8) {
            assert_eq!(chunk.offset, state.sent_offset());
            state.on_sent(chunk.end).unwrap();
            assert_invariant(&state);
            // Nothing else may go out until the ack arrives
            assert_eq!(state.next_chunk(8), None);
            ends.push(chunk.end);
            state.on_ack(chunk.end).unwrap();
            assert_invariant(&state);
        }

        assert_eq!(ends, vec![8, 16, 20]);
        assert_eq!(state.status(), SentFileStatus::Received);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn test_sent_then_received() {
        let mut state = file(4);
        state.on_accept().unwrap();
        let chunk = state.next_chunk(8).unwrap();
        state.on_sent(chunk.end).unwrap();
        assert_eq!(state.status(), SentFileStatus::Sent);
        assert_eq!(state.on_ack(4).unwrap(), AckOutcome::Complete);
        assert_eq!(state.status(), SentFileStatus::Received);
    }

    #[test]
    fn test_ack_beyond_sent_rejected() {
        let mut state = file(20);
        state.on_accept().unwrap();
        state.on_sent(8).unwrap();
        let err = state.on_ack(16).unwrap_err();
        assert!(matches!(err, TransferError::Violation { .. }));
        assert_eq!(state.ack_offset(), 0);
        assert_eq!(state.sent_offset(), 8);
        assert_eq!(state.status(), SentFileStatus::Failed);
        assert_eq!(state.next_chunk(8), None);
    }

    #[test]
    fn test_ack_behind_acknowledged_rejected() {
        let mut state = file(20);
        state.on_accept().unwrap();
        state.on_sent(8).unwrap();
        state.on_ack(8).unwrap();
        state.on_sent(16).unwrap();
        assert!(state.on_ack(4).is_err());
        assert_eq!(state.ack_offset(), 8);
        assert_invariant(&state);
    }

    #[test]
    fn test_duplicate_ack_rejected() {
        let mut state = file(20);
        state.on_accept().unwrap();
        state.on_sent(8).unwrap();
        state.on_ack(8).unwrap();
        assert!(state.on_ack(8).is_err());
        assert_eq!(state.status(), SentFileStatus::Failed);
    }

    #[test]
    fn test_on_sent_requires_ack_first() {
        let mut state = file(20);
        state.on_accept().unwrap();
        state.on_sent(8).unwrap();
        assert!(state.on_sent(16).is_err());
        assert_eq!(state.sent_offset(), 8);
    }

    #[test]
    fn test_reject_halts_sending() {
        let mut state = file(20);
        state.on_accept().unwrap();
        state.on_sent(8).unwrap();
        assert!(state.on_reject());
        assert_eq!(state.on_ack(8).unwrap(), AckOutcome::Stale);
        assert_eq!(state.next_chunk(8), None);
        assert!(state.on_sent(16).is_err());
    }

    #[test]
    fn test_cancel_only_before_completion() {
        let mut state = file(4);
        state.cancel().unwrap();
        assert_eq!(state.status(), SentFileStatus::Cancelled);

        let mut state = file(4);
        state.on_accept().unwrap();
        state.on_sent(4).unwrap();
        assert!(state.cancel().is_err());
    }

    #[test]
    fn test_empty_file_sends_one_empty_chunk() {
        let mut state = file(0);
        state.on_accept().unwrap();
        let chunk = state.next_chunk(8).unwrap();
        assert_eq!((chunk.offset, chunk.end, chunk.data.as_str()), (0, 0, ""));
        state.on_sent(0).unwrap();
        assert_eq!(state.status(), SentFileStatus::Sent);
        assert_eq!(state.on_ack(0).unwrap(), AckOutcome::Complete);
    }
}
