/// Raw bytes per `fileSendChunk` (8 KiB, 8192)
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Largest raw chunk whose base64 form plus framing stays under the
/// ~16 KiB reliable message ceiling of browser data channels
pub const MAX_CHUNK_SIZE: usize = 11 * 1024;

/// Largest file a peer may offer; contents are held in memory
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
