//! Maps transfer wire messages onto per-file state.
//!
//! The engine never touches the channel: every operation returns the
//! reply (if any) for the caller to send.

use std::collections::HashMap;

use super::TransferError;
use super::constants::{CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_FILE_SIZE};
use super::incoming::{ChunkOutcome, ReceivedFileState};
use super::outgoing::{AckOutcome, SentFileState};
use crate::wire::{WireMessage, now_millis};

pub struct FileTransferEngine {
    chunk_size: usize,
    outgoing: HashMap<String, SentFileState>,
    incoming: HashMap<String, ReceivedFileState>,
}

impl Default for FileTransferEngine {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl FileTransferEngine {
    pub fn new(chunk_size: usize) -> Self {
        let clamped = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        if clamped != chunk_size {
            tracing::warn!(
                "Chunk size {} out of range, using {} instead",
                chunk_size,
                clamped
            );
        }
        Self {
            chunk_size: clamped,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn sent_file(&self, id: &str) -> Option<&SentFileState> {
        self.outgoing.get(id)
    }

    pub fn received_file(&self, id: &str) -> Option<&ReceivedFileState> {
        self.incoming.get(id)
    }

    pub fn sent_files(&self) -> impl Iterator<Item = &SentFileState> {
        self.outgoing.values()
    }

    pub fn received_files(&self) -> impl Iterator<Item = &ReceivedFileState> {
        self.incoming.values()
    }

    // ── Sending side ────────────────────────────────────────────────────────

    /// Register a file and build the `fileSendRequest` announcing it.
    ///
    /// No bytes move until the peer accepts.
    pub fn send_file(
        &mut self,
        file_name: String,
        mime_type: String,
        contents: Vec<u8>,
    ) -> (String, WireMessage) {
        let id = uuid::Uuid::new_v4().to_string();
        let state = SentFileState::new(id.clone(), file_name, mime_type, contents);
        tracing::info!(
            "Offering file {} ({} bytes) as {}",
            state.file_name,
            state.total_size,
            id
        );

        let request = WireMessage::FileSendRequest {
            id: id.clone(),
            name: state.file_name.clone(),
            mime_type: state.mime_type.clone(),
            size: state.total_size,
            sent: now_millis(),
        };
        self.outgoing.insert(id.clone(), state);
        (id, request)
    }

    /// Withdraw an offer or stop sending.
    ///
    /// The cancel notice goes through `send` first; the file only moves
    /// to `cancelled` once the peer has been told.
    pub fn cancel_file<E: From<TransferError>>(
        &mut self,
        id: &str,
        send: impl FnOnce(&WireMessage) -> Result<(), E>,
    ) -> Result<(), E> {
        let state = self.outgoing_mut(id)?;
        state.check_cancel()?;
        send(&WireMessage::FileSendCancel {
            id: id.to_string(),
            sent: now_millis(),
        })?;
        state.cancel()?;
        tracing::info!("Cancelled outgoing file {}", id);
        Ok(())
    }

    /// Peer accepted: emit the first chunk
    pub fn on_accept(&mut self, id: &str) -> Result<Option<WireMessage>, TransferError> {
        let chunk_size = self.chunk_size;
        let state = self.outgoing_mut(id)?;
        if state.is_finished() {
            tracing::debug!("Ignoring stale accept for {}", id);
            return Ok(None);
        }
        state.on_accept()?;
        tracing::info!("Peer accepted file {}", id);
        Self::emit_next_chunk(state, chunk_size)
    }

    pub fn on_reject(&mut self, id: &str) -> Result<(), TransferError> {
        let state = self.outgoing_mut(id)?;
        if state.on_reject() {
            tracing::info!("Peer rejected file {}", id);
        } else {
            tracing::debug!("Ignoring stale reject for {}", id);
        }
        Ok(())
    }

    /// Apply an ack; emits the next chunk while data remains
    pub fn on_ack(&mut self, id: &str, end: u64) -> Result<Option<WireMessage>, TransferError> {
        let chunk_size = self.chunk_size;
        let state = self.outgoing_mut(id)?;
        match state.on_ack(end)? {
            AckOutcome::Continue => Self::emit_next_chunk(state, chunk_size),
            AckOutcome::Complete => {
                tracing::info!("File {} delivered ({} bytes)", id, state.total_size);
                Ok(None)
            }
            AckOutcome::Stale => {
                tracing::debug!("Ignoring stale ack for {} at {}", id, end);
                Ok(None)
            }
        }
    }

    fn emit_next_chunk(
        state: &mut SentFileState,
        chunk_size: usize,
    ) -> Result<Option<WireMessage>, TransferError> {
        let Some(chunk) = state.next_chunk(chunk_size) else {
            return Ok(None);
        };
        state.on_sent(chunk.end)?;
        tracing::debug!(
            "Sending chunk [{}, {}) of {}",
            chunk.offset,
            chunk.end,
            state.id
        );
        Ok(Some(WireMessage::FileSendChunk {
            id: state.id.clone(),
            sent: now_millis(),
            offset: chunk.offset,
            end: chunk.end,
            data: chunk.data,
        }))
    }

    fn outgoing_mut(&mut self, id: &str) -> Result<&mut SentFileState, TransferError> {
        self.outgoing
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownFile(id.to_string()))
    }

    // ── Receiving side ──────────────────────────────────────────────────────

    pub fn on_request(
        &mut self,
        id: String,
        file_name: String,
        mime_type: String,
        size: u64,
    ) -> Result<(), TransferError> {
        if self.incoming.contains_key(&id) || self.outgoing.contains_key(&id) {
            return Err(TransferError::DuplicateFile(id));
        }
        if size > MAX_FILE_SIZE {
            tracing::warn!("Refusing file {} from peer: {} bytes", id, size);
            return Err(TransferError::TooLarge {
                id,
                size,
                max: MAX_FILE_SIZE,
            });
        }
        tracing::info!("Peer offers file {} ({} bytes) as {}", file_name, size, id);
        self.incoming
            .insert(id.clone(), ReceivedFileState::new(id, file_name, mime_type, size));
        Ok(())
    }

    /// Accept an offer; the state changes only after `send` succeeds
    pub fn accept_file<E: From<TransferError>>(
        &mut self,
        id: &str,
        send: impl FnOnce(&WireMessage) -> Result<(), E>,
    ) -> Result<(), E> {
        let state = self.incoming_mut(id)?;
        state.check_accept()?;
        send(&WireMessage::FileSendAccept {
            id: id.to_string(),
            sent: now_millis(),
        })?;
        state.accept()?;
        tracing::info!("Accepted incoming file {}", id);
        Ok(())
    }

    pub fn reject_file<E: From<TransferError>>(
        &mut self,
        id: &str,
        send: impl FnOnce(&WireMessage) -> Result<(), E>,
    ) -> Result<(), E> {
        let state = self.incoming_mut(id)?;
        state.check_reject()?;
        send(&WireMessage::FileSendReject {
            id: id.to_string(),
            sent: now_millis(),
        })?;
        state.reject()?;
        tracing::info!("Rejected incoming file {}", id);
        Ok(())
    }

    pub fn on_cancel(&mut self, id: &str) -> Result<(), TransferError> {
        if self.incoming_mut(id)?.on_cancel() {
            tracing::info!("Peer cancelled file {}", id);
        } else {
            tracing::debug!("Ignoring stale cancel for {}", id);
        }
        Ok(())
    }

    /// Store a chunk and build its ack; stale chunks produce no reply
    pub fn on_chunk(
        &mut self,
        id: &str,
        offset: u64,
        end: u64,
        data: String,
    ) -> Result<Option<WireMessage>, TransferError> {
        let state = self.incoming_mut(id)?;
        match state.on_chunk(offset, end, data)? {
            ChunkOutcome::Accepted { end, complete } => {
                if complete {
                    tracing::info!("File {} received ({} bytes)", id, state.total_size);
                }
                Ok(Some(WireMessage::FileSendChunkAck {
                    id: id.to_string(),
                    sent: now_millis(),
                    end,
                }))
            }
            ChunkOutcome::Stale => {
                tracing::debug!("Ignoring stale chunk for {} at {}", id, offset);
                Ok(None)
            }
        }
    }

    fn incoming_mut(&mut self, id: &str) -> Result<&mut ReceivedFileState, TransferError> {
        self.incoming
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownFile(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{ReceivedFileStatus, SentFileStatus};

    fn delivered(_: &WireMessage) -> Result<(), TransferError> {
        Ok(())
    }

    fn chunk_bounds(msg: &WireMessage) -> (u64, u64) {
        match msg {
            WireMessage::FileSendChunk { offset, end, .. } => (*offset, *end),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_twenty_thousand_bytes_in_three_chunks() {
        let mut engine = FileTransferEngine::new(8192);
        let (id, request) = engine.send_file(
            "blob.bin".to_string(),
            "application/octet-stream".to_string(),
            vec![42u8; 20000],
        );
        assert!(matches!(request, WireMessage::FileSendRequest { size: 20000, .. }));
        assert_eq!(engine.sent_file(&id).unwrap().status(), SentFileStatus::Requested);

        let mut bounds = Vec::new();
        let mut next = engine.on_accept(&id).unwrap();
        while let Some(chunk) = next {
            let (offset, end) = chunk_bounds(&chunk);
            bounds.push((offset, end));
            if end == 20000 {
                assert_eq!(engine.sent_file(&id).unwrap().status(), SentFileStatus::Sent);
            }
            next = engine.on_ack(&id, end).unwrap();
        }

        assert_eq!(bounds, vec![(0, 8192), (8192, 16384), (16384, 20000)]);
        assert_eq!(engine.sent_file(&id).unwrap().status(), SentFileStatus::Received);
    }

    #[test]
    fn test_sender_and_receiver_engines_agree() {
        let mut sender = FileTransferEngine::new(1000);
        let mut receiver = FileTransferEngine::new(1000);
        let contents: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();

        let (id, request) =
            sender.send_file("data.bin".to_string(), "application/octet-stream".to_string(), contents.clone());
        let WireMessage::FileSendRequest { id: rid, name, mime_type, size, .. } = request else {
            panic!("expected request");
        };
        receiver.on_request(rid, name, mime_type, size).unwrap();
        receiver.accept_file(&id, delivered).unwrap();

        let mut next = sender.on_accept(&id).unwrap();
        while let Some(WireMessage::FileSendChunk { id, offset, end, data, .. }) = next {
            let ack = receiver.on_chunk(&id, offset, end, data).unwrap().unwrap();
            let WireMessage::FileSendChunkAck { end, .. } = ack else {
                panic!("expected ack");
            };
            next = sender.on_ack(&id, end).unwrap();
        }

        let received = receiver.received_file(&id).unwrap();
        assert_eq!(received.status(), ReceivedFileStatus::Received);
        assert_eq!(received.assembled_contents(), Some(contents.as_slice()));
        assert_eq!(sender.sent_file(&id).unwrap().status(), SentFileStatus::Received);
    }

    #[test]
    fn test_out_of_order_ack_aborts_only_that_file() {
        let mut engine = FileTransferEngine::new(10);
        let (a, _) = engine.send_file("a".to_string(), "text/plain".to_string(), vec![0; 30]);
        let (b, _) = engine.send_file("b".to_string(), "text/plain".to_string(), vec![0; 30]);
        engine.on_accept(&a).unwrap();
        engine.on_accept(&b).unwrap();

        assert!(engine.on_ack(&a, 20).is_err());
        assert_eq!(engine.sent_file(&a).unwrap().status(), SentFileStatus::Failed);
        assert!(engine.on_ack(&b, 10).unwrap().is_some());
    }

    #[test]
    fn test_unknown_file_id() {
        let mut engine = FileTransferEngine::default();
        assert_eq!(
            engine.on_ack("nope", 1).unwrap_err(),
            TransferError::UnknownFile("nope".to_string())
        );
        assert!(engine.on_chunk("nope", 0, 1, "AA==".to_string()).is_err());
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let mut engine = FileTransferEngine::default();
        engine
            .on_request("x".to_string(), "a".to_string(), "text/plain".to_string(), 1)
            .unwrap();
        assert!(
            engine
                .on_request("x".to_string(), "a".to_string(), "text/plain".to_string(), 1)
                .is_err()
        );
    }

    #[test]
    fn test_cancel_then_stale_ack() {
        let mut engine = FileTransferEngine::new(10);
        let (id, _) = engine.send_file("a".to_string(), "text/plain".to_string(), vec![0; 30]);
        engine.on_accept(&id).unwrap();
        let mut notice = None;
        engine
            .cancel_file(&id, |msg| {
                notice = Some(msg.clone());
                Ok::<(), TransferError>(())
            })
            .unwrap();
        assert!(matches!(notice, Some(WireMessage::FileSendCancel { .. })));
        assert_eq!(engine.on_ack(&id, 10).unwrap(), None);
        assert_eq!(engine.sent_file(&id).unwrap().status(), SentFileStatus::Cancelled);
    }

    #[test]
    fn test_failed_send_leaves_state_unchanged() {
        let offline = |_: &WireMessage| -> Result<(), TransferError> {
            Err(TransferError::UnknownFile("offline".to_string()))
        };

        let mut receiver = FileTransferEngine::default();
        receiver
            .on_request("x".to_string(), "a".to_string(), "text/plain".to_string(), 4)
            .unwrap();
        assert!(receiver.accept_file("x", offline).is_err());
        assert!(receiver.reject_file("x", offline).is_err());
        assert_eq!(
            receiver.received_file("x").unwrap().status(),
            ReceivedFileStatus::Requested
        );
        receiver.accept_file("x", delivered).unwrap();
        assert_eq!(
            receiver.received_file("x").unwrap().status(),
            ReceivedFileStatus::Accepted
        );

        let mut sender = FileTransferEngine::default();
        let (id, _) = sender.send_file("a".to_string(), "text/plain".to_string(), vec![0; 4]);
        assert!(sender.cancel_file(&id, offline).is_err());
        assert_eq!(sender.sent_file(&id).unwrap().status(), SentFileStatus::Requested);
    }

    #[test]
    fn test_oversized_offer_is_refused() {
        let mut engine = FileTransferEngine::default();
        let err = engine
            .on_request(
                "big".to_string(),
                "disk.img".to_string(),
                "application/octet-stream".to_string(),
                u64::MAX,
            )
            .unwrap_err();
        assert!(matches!(err, TransferError::TooLarge { size: u64::MAX, .. }));
        assert!(engine.received_file("big").is_none());

        engine
            .on_request(
                "ok".to_string(),
                "disk.img".to_string(),
                "application/octet-stream".to_string(),
                MAX_FILE_SIZE,
            )
            .unwrap();
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        assert_eq!(FileTransferEngine::new(64 * 1024).chunk_size(), MAX_CHUNK_SIZE);
        assert_eq!(FileTransferEngine::new(0).chunk_size(), 1);
    }
}
