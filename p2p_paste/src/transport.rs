//! Boundary to the real-time transport (a browser `RTCPeerConnection` or
//! a native WebRTC stack).
//!
//! Calls the core makes are trait methods; callbacks the transport fires
//! are handed to the session as [`TransportEvent`] values.

use crate::signaling::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("ICE gathering finished without producing any candidate")]
    NoCandidates,
    #[error("ICE gathering was interrupted before completing")]
    GatheringInterrupted,
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("transport error: {0}")]
    Other(String),
}

/// Mirrors `RTCPeerConnection.connectionState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Mirrors `RTCDataChannel.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Opaque handle to a local or remote media track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Output of the transport's ICE gatherer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceGatheringEvent {
    Candidate(IceCandidate),
    Complete,
}

/// Callbacks from the transport, fed to [`crate::Session::handle_transport_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged(PeerConnectionState),
    /// The negotiated data channel reached `open` (either side)
    DataChannelOpened,
    DataChannelClosed,
    /// Text frame received on the data channel
    ChannelMessage(String),
    RemoteTrackAdded(MediaTrack),
    RemoteTrackRemoved(String),
}

/// Calls the core makes into the peer connection.
///
/// Implementations wrap exactly one peer connection and its single
/// reliable, ordered data channel.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Create a local offer (`createOffer`)
    async fn create_offer(&mut self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Next output of the ICE gatherer; `None` when the gatherer is gone
    async fn next_ice_event(&mut self) -> Option<IceGatheringEvent>;

    /// Create the chat/file data channel on the offering side
    fn create_data_channel(&mut self, label: &str) -> Result<(), TransportError>;

    fn channel_state(&self) -> ChannelState;

    fn send(&mut self, text: &str) -> Result<(), TransportError>;

    fn add_track(&mut self, track: MediaTrack) -> Result<(), TransportError>;

    fn remove_track(&mut self, track_id: &str) -> Result<(), TransportError>;
}

/// Collect candidates until the gatherer reports completion.
///
/// Fails if gathering ends with no candidate at all, since a token
/// without candidates can never connect.
pub async fn wait_for_ice_gathering_complete<T: Transport>(
    transport: &mut T,
) -> Result<Vec<IceCandidate>, TransportError> {
    let mut candidates = Vec::new();
    loop {
        match transport.next_ice_event().await {
            Some(IceGatheringEvent::Candidate(candidate)) => {
                tracing::debug!("Gathered ICE candidate: {}", candidate.candidate);
                candidates.push(candidate);
            }
            Some(IceGatheringEvent::Complete) => break,
            None => return Err(TransportError::GatheringInterrupted),
        }
    }

    if candidates.is_empty() {
        return Err(TransportError::NoCandidates);
    }
    tracing::info!("ICE gathering complete with {} candidates", candidates.len());
    Ok(candidates)
}
