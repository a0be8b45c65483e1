//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use p2p_paste::channel::{ChannelFrame, Inbound, route_inbound};
use p2p_paste::signaling::{IceCandidate, SessionDescription};
use p2p_paste::transport::{
    ChannelState, IceGatheringEvent, MediaTrack, PeerConnectionState, Transport, TransportError,
};
use p2p_paste::{ConnectionState, Session, SessionConfig, TransportEvent, WireMessage};
use std::collections::VecDeque;

pub struct FakeTransport {
    pub name: &'static str,
    pub channel: ChannelState,
    pub sent: Vec<String>,
    pub data_channels: Vec<String>,
    pub local: Vec<SessionDescription>,
    pub remote: Vec<SessionDescription>,
    pub added_candidates: Vec<IceCandidate>,
    pub ice_events: VecDeque<IceGatheringEvent>,
    pub tracks: Vec<MediaTrack>,
    pub offers_created: usize,
    pub answers_created: usize,
    pub fail_create_offer: bool,
}

impl FakeTransport {
    pub fn new(name: &'static str) -> Self {
        let mut transport = Self {
            name,
            channel: ChannelState::Connecting,
            sent: Vec::new(),
            data_channels: Vec::new(),
            local: Vec::new(),
            remote: Vec::new(),
            added_candidates: Vec::new(),
            ice_events: VecDeque::new(),
            tracks: Vec::new(),
            offers_created: 0,
            answers_created: 0,
            fail_create_offer: false,
        };
        transport.script_gathering(&[
            &format!("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host ({})", name),
            &format!("candidate:2 1 udp 1686052607 198.51.100.7 5001 typ srflx ({})", name),
        ]);
        transport
    }

    /// Replace the ICE gatherer output with these candidates then `Complete`
    pub fn script_gathering(&mut self, candidates: &[&str]) {
        self.ice_events.clear();
        for c in candidates {
            self.ice_events
                .push_back(IceGatheringEvent::Candidate(IceCandidate::new(*c)));
        }
        self.ice_events.push_back(IceGatheringEvent::Complete);
    }

    /// Drain raw frames sent so far
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Wire messages among the frames sent so far (control frames skipped)
    pub fn sent_wire(&self) -> Vec<WireMessage> {
        self.sent
            .iter()
            .filter_map(|text| match route_inbound(text) {
                Inbound::Message(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }
}

impl Transport for FakeTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        if self.fail_create_offer {
            return Err(TransportError::Other("createOffer rejected".to_string()));
        }
        self.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "v=0 {} offer {}",
            self.name, self.offers_created
        )))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, TransportError> {
        self.answers_created += 1;
        Ok(SessionDescription::answer(format!(
            "v=0 {} answer {}",
            self.name, self.answers_created
        )))
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.local.push(description);
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.remote.push(description);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.added_candidates.push(candidate);
        Ok(())
    }

    async fn next_ice_event(&mut self) -> Option<IceGatheringEvent> {
        self.ice_events.pop_front()
    }

    fn create_data_channel(&mut self, label: &str) -> Result<(), TransportError> {
        self.data_channels.push(label.to_string());
        Ok(())
    }

    fn channel_state(&self) -> ChannelState {
        self.channel
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if self.channel != ChannelState::Open {
            return Err(TransportError::ChannelNotOpen);
        }
        self.sent.push(text.to_string());
        Ok(())
    }

    fn add_track(&mut self, track: MediaTrack) -> Result<(), TransportError> {
        self.tracks.push(track);
        Ok(())
    }

    fn remove_track(&mut self, track_id: &str) -> Result<(), TransportError> {
        self.tracks.retain(|t| t.id != track_id);
        Ok(())
    }
}

pub fn config(name: &str, chunk_size: usize) -> SessionConfig {
    SessionConfig {
        display_name: name.to_string(),
        chunk_size,
        ..SessionConfig::default()
    }
}

/// Mark the transport connected and open its channel
pub async fn connect(session: &mut Session<FakeTransport>) {
    session.transport_mut().channel = ChannelState::Open;
    session
        .handle_transport_event(TransportEvent::ConnectionStateChanged(
            PeerConnectionState::Connected,
        ))
        .await;
    session
        .handle_transport_event(TransportEvent::DataChannelOpened)
        .await;
}

/// Run the full copy/paste handshake and open the channel on both sides
pub async fn connected_pair(chunk_size: usize) -> (Session<FakeTransport>, Session<FakeTransport>) {
    p2p_paste::logging::init_logging("p2p_paste=debug");
    let mut host = Session::new(config("host", chunk_size), FakeTransport::new("host"), None);
    let invite = host.create_invitation().await.unwrap();

    let mut guest = Session::new(
        config("guest", chunk_size),
        FakeTransport::new("guest"),
        Some(invite),
    );
    let response = guest.accept_invitation().await.unwrap();
    host.process_response(&response).await.unwrap();

    connect(&mut host).await;
    connect(&mut guest).await;
    assert_eq!(host.state(), ConnectionState::Connected { is_live: true });
    assert_eq!(guest.state(), ConnectionState::Connected { is_live: true });

    pump(&mut host, &mut guest).await;
    (host, guest)
}

/// Deliver frames both ways until neither side has anything left to send.
///
/// Returns the number of frames delivered.
pub async fn pump(a: &mut Session<FakeTransport>, b: &mut Session<FakeTransport>) -> usize {
    let mut delivered = 0;
    loop {
        let from_a = a.transport_mut().take_sent();
        let from_b = b.transport_mut().take_sent();
        if from_a.is_empty() && from_b.is_empty() {
            return delivered;
        }
        for text in from_a {
            delivered += 1;
            b.handle_transport_event(TransportEvent::ChannelMessage(text))
                .await;
        }
        for text in from_b {
            delivered += 1;
            a.handle_transport_event(TransportEvent::ChannelMessage(text))
                .await;
        }
    }
}

/// Deliver one wire message to a session as if the peer had sent it
pub async fn deliver(session: &mut Session<FakeTransport>, msg: &WireMessage) {
    let text = ChannelFrame::normal(msg).unwrap().to_text().unwrap();
    session
        .handle_transport_event(TransportEvent::ChannelMessage(text))
        .await;
}
