//! One peer-to-peer session: connection lifecycle, chat and files over
//! an injected [`Transport`].

use tokio::sync::{broadcast, mpsc, watch};

use crate::channel::{ChannelFrame, Inbound, Renegotiator, route_inbound};
use crate::chat_log::{ChatLog, LocalMessage, Origin};
use crate::config::SessionConfig;
use crate::connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::error::{Result, SessionError};
use crate::signaling::{
    IceCandidate, SessionDescription, decode_answer, decode_offer, encode_answer, encode_offer,
};
use crate::transfer::{FileTransferEngine, TransferError};
use crate::transport::{
    MediaTrack, PeerConnectionState, Transport, TransportEvent, wait_for_ice_gathering_complete,
};
use crate::wire::{WireMessage, now_millis};
use crate::{SessionCommand, SessionEvent};

/// Capacity of the UI notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Host invitation waiting for the guest's response token
#[derive(Debug, Clone)]
pub struct PendingResponse {
    pub invite_token: String,
    /// Epoch milliseconds when the invitation was created
    pub created_at: u64,
}

pub struct Session<T: Transport> {
    config: SessionConfig,
    transport: T,
    connection: ConnectionStateMachine,
    transfers: FileTransferEngine,
    renegotiator: Renegotiator,
    log: ChatLog,
    pending_response: Option<PendingResponse>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport> Session<T> {
    /// A bootstrap token (e.g. from the link that opened the app) makes
    /// this session the guest; without one it is an idle host.
    pub fn new(config: SessionConfig, transport: T, bootstrap_token: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let transfers = FileTransferEngine::new(config.chunk_size);
        Self {
            config,
            transport,
            connection: ConnectionStateMachine::from_bootstrap(bootstrap_token),
            transfers,
            renegotiator: Renegotiator::new(),
            log: ChatLog::new(),
            pending_response: None,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn transfers(&self) -> &FileTransferEngine {
        &self.transfers
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn pending_response(&self) -> Option<&PendingResponse> {
        self.pending_response.as_ref()
    }

    pub fn awaiting_response(&self) -> bool {
        self.pending_response.is_some()
    }

    // ── Host flow ───────────────────────────────────────────────────────────

    /// Create the data channel and offer, gather candidates, and return
    /// the invitation token
    pub async fn create_invitation(&mut self) -> Result<String> {
        let state = self.dispatch(ConnectionEvent::CreateInvitation);
        if state != ConnectionState::HostCreatingInvite {
            return Err(SessionError::WrongState(state));
        }

        match self.build_invitation().await {
            Ok(token) => {
                self.dispatch(ConnectionEvent::CreateInvitationOk {
                    token: token.clone(),
                });
                self.pending_response = Some(PendingResponse {
                    invite_token: token.clone(),
                    created_at: now_millis(),
                });
                Ok(token)
            }
            Err(e) => {
                self.dispatch(ConnectionEvent::CreateInvitationFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn build_invitation(&mut self) -> Result<String> {
        self.transport
            .create_data_channel(&self.config.channel_label)?;
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        let candidates = wait_for_ice_gathering_complete(&mut self.transport).await?;
        Ok(encode_offer(&offer, &candidates)?)
    }

    pub fn copy_invitation(&mut self) -> ConnectionState {
        self.dispatch(ConnectionEvent::CopyInvitation)
    }

    /// Fulfil the pending invitation with the guest's response token.
    ///
    /// A token that fails to decode leaves the invitation pending so the
    /// user can paste a corrected one.
    pub async fn process_response(&mut self, token: &str) -> Result<()> {
        if self.pending_response.is_none() {
            return Err(SessionError::NoPendingResponse);
        }

        let bundle = decode_answer(token).inspect_err(|e| {
            tracing::warn!("Rejected response token: {}", e);
        })?;

        let state = self.dispatch(ConnectionEvent::ReceiveAndAcceptResponse {
            token: token.trim().to_string(),
        });
        self.pending_response = None;
        if !matches!(state, ConnectionState::HostResponseAccepted { .. }) {
            return Err(SessionError::WrongState(state));
        }

        if let Err(e) = self.apply_remote_bundle(bundle.description, bundle.candidates).await {
            self.dispatch(ConnectionEvent::TransportFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    // ── Guest flow ──────────────────────────────────────────────────────────

    /// Apply the host's offer and return the response token
    pub async fn accept_invitation(&mut self) -> Result<String> {
        let state = self.dispatch(ConnectionEvent::AcceptInvitation);
        let ConnectionState::GuestInviteAccepted { invite_token } = state else {
            return Err(SessionError::WrongState(state));
        };

        match self.build_response(&invite_token).await {
            Ok(token) => {
                self.dispatch(ConnectionEvent::CreateResponse {
                    token: token.clone(),
                });
                Ok(token)
            }
            Err(e) => {
                self.dispatch(ConnectionEvent::CreateResponseFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn build_response(&mut self, invite_token: &str) -> Result<String> {
        let bundle = decode_offer(invite_token)?;
        self.apply_remote_bundle(bundle.description, bundle.candidates)
            .await?;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        let candidates = wait_for_ice_gathering_complete(&mut self.transport).await?;
        Ok(encode_answer(&answer, &candidates)?)
    }

    pub fn reject_invitation(&mut self) -> ConnectionState {
        self.dispatch(ConnectionEvent::RejectInvitation)
    }

    pub fn copy_response(&mut self) -> ConnectionState {
        self.dispatch(ConnectionEvent::CopyResponse)
    }

    async fn apply_remote_bundle(
        &mut self,
        description: SessionDescription,
        candidates: Vec<IceCandidate>,
    ) -> Result<()> {
        self.transport.set_remote_description(description).await?;
        for candidate in candidates {
            self.transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    // ── Connected operations ────────────────────────────────────────────────

    pub fn send_chat(&mut self, text: &str) -> Result<()> {
        self.ensure_connected()?;
        let sent = now_millis();
        self.send_wire(&WireMessage::Chat {
            sent,
            msg: text.to_string(),
        })?;
        self.append_log(LocalMessage::Chat {
            origin: Origin::Local,
            sent,
            msg: text.to_string(),
        });
        Ok(())
    }

    /// Change our display name and announce it to the peer
    pub fn rename(&mut self, name: &str) -> Result<()> {
        self.ensure_connected()?;
        self.config.display_name = name.to_string();
        self.announce_name()
    }

    fn announce_name(&mut self) -> Result<()> {
        let sent = now_millis();
        let name = self.config.display_name.clone();
        self.send_wire(&WireMessage::Rename {
            sent,
            name: name.clone(),
        })?;
        self.append_log(LocalMessage::Rename {
            origin: Origin::Local,
            sent,
            name,
        });
        Ok(())
    }

    /// Offer a file to the peer; returns its transfer id
    pub fn send_file(&mut self, file_name: &str, mime_type: &str, contents: Vec<u8>) -> Result<String> {
        self.ensure_connected()?;
        let (id, request) =
            self.transfers
                .send_file(file_name.to_string(), mime_type.to_string(), contents);
        self.append_log(LocalMessage::FileSend {
            file_id: id.clone(),
        });
        self.send_wire(&request)?;
        self.notify_file(&id);
        Ok(id)
    }

    pub fn accept_file(&mut self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        let transport = &mut self.transport;
        self.transfers
            .accept_file(id, |reply| send_frame(transport, reply))?;
        self.notify_file(id);
        Ok(())
    }

    pub fn reject_file(&mut self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        let transport = &mut self.transport;
        self.transfers
            .reject_file(id, |reply| send_frame(transport, reply))?;
        self.notify_file(id);
        Ok(())
    }

    pub fn cancel_file(&mut self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        let transport = &mut self.transport;
        self.transfers
            .cancel_file(id, |reply| send_frame(transport, reply))?;
        self.notify_file(id);
        Ok(())
    }

    pub async fn start_renegotiation(&mut self) -> Result<()> {
        let connected = self.state().is_connected();
        self.renegotiator
            .start(&mut self.transport, connected)
            .await?;
        Ok(())
    }

    /// Add a local media track and renegotiate
    pub async fn add_track(&mut self, track: MediaTrack) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Adding local {:?} track {}", track.kind, track.id);
        self.transport.add_track(track)?;
        self.start_renegotiation().await
    }

    pub async fn remove_track(&mut self, track_id: &str) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Removing local track {}", track_id);
        self.transport.remove_track(track_id)?;
        self.start_renegotiation().await
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    /// Entry point for every transport callback
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged(peer_state) => {
                self.on_peer_connection_state(peer_state)
            }
            TransportEvent::DataChannelOpened => {
                tracing::info!("Data channel open");
                if let Err(e) = self.announce_name() {
                    tracing::warn!("Failed to announce name: {}", e);
                }
            }
            TransportEvent::DataChannelClosed => {
                tracing::info!("Data channel closed");
                self.mark_disconnected();
            }
            TransportEvent::ChannelMessage(text) => self.handle_channel_message(&text).await,
            TransportEvent::RemoteTrackAdded(track) => {
                tracing::info!("Remote {:?} track {} added", track.kind, track.id);
                self.emit(SessionEvent::RemoteTrackAdded(track));
            }
            TransportEvent::RemoteTrackRemoved(track_id) => {
                tracing::info!("Remote track {} removed", track_id);
                self.emit(SessionEvent::RemoteTrackRemoved(track_id));
            }
        }
    }

    fn on_peer_connection_state(&mut self, peer_state: PeerConnectionState) {
        match peer_state {
            PeerConnectionState::Connected => {
                if !self.state().is_connected()
                    && self.dispatch(ConnectionEvent::EstablishConnection).is_connected()
                {
                    self.append_log(LocalMessage::ChatStarted { at: now_millis() });
                }
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Closed => {
                self.mark_disconnected();
            }
            PeerConnectionState::Failed => {
                let state = self.state();
                if state.is_connected() {
                    self.mark_disconnected();
                } else if !state.is_terminal() && !matches!(state, ConnectionState::Connected { .. }) {
                    self.dispatch(ConnectionEvent::TransportFailed {
                        reason: "peer connection failed".to_string(),
                    });
                }
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {
                tracing::debug!("Peer connection state: {:?}", peer_state);
            }
        }
    }

    fn mark_disconnected(&mut self) {
        if self.state().is_connected() {
            self.dispatch(ConnectionEvent::Disconnect);
            self.append_log(LocalMessage::Disconnected { at: now_millis() });
        }
    }

    async fn handle_channel_message(&mut self, text: &str) {
        match route_inbound(text) {
            Inbound::Message(msg) => self.handle_wire_message(msg),
            Inbound::RenegotiateRequest(offer) => {
                if let Err(e) = self.renegotiator.on_request(&mut self.transport, offer).await {
                    tracing::error!("Renegotiation request failed: {}", e);
                    self.emit(SessionEvent::Error(e.to_string()));
                }
            }
            Inbound::RenegotiateResponse(answer) => {
                if let Err(e) = self.renegotiator.on_response(&mut self.transport, answer).await {
                    tracing::error!("Renegotiation response failed: {}", e);
                    self.emit(SessionEvent::Error(e.to_string()));
                }
            }
            Inbound::Malformed(e) => {
                tracing::warn!("Dropping inbound payload: {}", e);
            }
        }
    }

    fn handle_wire_message(&mut self, msg: WireMessage) {
        tracing::debug!("Received {}", msg.kind());
        let file_id = msg.file_id().map(str::to_string);

        let result = match msg {
            WireMessage::Chat { sent, msg } => {
                self.append_log(LocalMessage::Chat {
                    origin: Origin::Remote,
                    sent,
                    msg,
                });
                Ok(None)
            }
            WireMessage::Rename { sent, name } => {
                self.append_log(LocalMessage::Rename {
                    origin: Origin::Remote,
                    sent,
                    name,
                });
                Ok(None)
            }
            WireMessage::FileSendRequest {
                id,
                name,
                mime_type,
                size,
                ..
            } => match self.transfers.on_request(id.clone(), name, mime_type, size) {
                Ok(()) => {
                    self.append_log(LocalMessage::FileRecv { file_id: id });
                    Ok(None)
                }
                // Tell the sender so it does not wait on an answer forever
                Err(e @ TransferError::TooLarge { .. }) => {
                    let reject = WireMessage::FileSendReject {
                        id,
                        sent: now_millis(),
                    };
                    if let Err(send_err) = self.send_wire(&reject) {
                        tracing::error!("Failed to refuse oversized file: {}", send_err);
                    }
                    Err(e)
                }
                Err(e) => Err(e),
            },
            WireMessage::FileSendAccept { id, .. } => self.transfers.on_accept(&id),
            WireMessage::FileSendReject { id, .. } => self.transfers.on_reject(&id).map(|()| None),
            WireMessage::FileSendCancel { id, .. } => self.transfers.on_cancel(&id).map(|()| None),
            WireMessage::FileSendChunk {
                id,
                offset,
                end,
                data,
                ..
            } => self.transfers.on_chunk(&id, offset, end, data),
            WireMessage::FileSendChunkAck { id, end, .. } => self.transfers.on_ack(&id, end),
        };

        match result {
            Ok(Some(reply)) => {
                if let Err(e) = self.send_wire(&reply) {
                    tracing::error!("Failed to send {}: {}", reply.kind(), e);
                    self.emit(SessionEvent::Error(e.to_string()));
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Transfer error: {}", e);
                self.emit(SessionEvent::Error(e.to_string()));
            }
        }

        if let Some(id) = file_id {
            self.notify_file(&id);
        }
    }

    // ── Plumbing ────────────────────────────────────────────────────────────

    /// Run one UI command, reporting failures as [`SessionEvent::Error`]
    pub async fn execute(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::CreateInvitation => self.create_invitation().await.map(|_| ()),
            SessionCommand::CopyInvitation => {
                self.copy_invitation();
                Ok(())
            }
            SessionCommand::ProcessResponse(token) => self.process_response(&token).await,
            SessionCommand::AcceptInvitation => self.accept_invitation().await.map(|_| ()),
            SessionCommand::RejectInvitation => {
                self.reject_invitation();
                Ok(())
            }
            SessionCommand::CopyResponse => {
                self.copy_response();
                Ok(())
            }
            SessionCommand::SendChat(text) => self.send_chat(&text),
            SessionCommand::Rename(name) => self.rename(&name),
            SessionCommand::SendFile {
                file_name,
                mime_type,
                contents,
            } => self.send_file(&file_name, &mime_type, contents).map(|_| ()),
            SessionCommand::AcceptFile(id) => self.accept_file(&id),
            SessionCommand::RejectFile(id) => self.reject_file(&id),
            SessionCommand::CancelFile(id) => self.cancel_file(&id),
            SessionCommand::AddTrack(track) => self.add_track(track).await,
            SessionCommand::RemoveTrack(id) => self.remove_track(&id).await,
            SessionCommand::Renegotiate => self.start_renegotiation().await,
        };

        if let Err(e) = result {
            tracing::error!("Command failed: {}", e);
            self.emit(SessionEvent::Error(e.to_string()));
        }
    }

    fn dispatch(&mut self, event: ConnectionEvent) -> ConnectionState {
        let state = self.connection.dispatch(event);
        self.emit(SessionEvent::StateChanged(state.clone()));
        state
    }

    fn ensure_connected(&self) -> Result<()> {
        let state = self.state();
        if !state.is_connected() {
            return Err(SessionError::WrongState(state));
        }
        Ok(())
    }

    fn send_wire(&mut self, msg: &WireMessage) -> Result<()> {
        send_frame(&mut self.transport, msg)
    }

    fn append_log(&mut self, entry: LocalMessage) {
        self.log.push(entry.clone());
        self.emit(SessionEvent::LogAppended(entry));
    }

    fn notify_file(&self, id: &str) {
        if let Some(file) = self.transfers.sent_file(id) {
            self.emit(SessionEvent::SentFileUpdated {
                id: id.to_string(),
                status: file.status(),
                progress: file.progress(),
            });
        } else if let Some(file) = self.transfers.received_file(id) {
            self.emit(SessionEvent::ReceivedFileUpdated {
                id: id.to_string(),
                status: file.status(),
                progress: file.progress(),
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn send_frame<T: Transport>(transport: &mut T, msg: &WireMessage) -> Result<()> {
    let text = ChannelFrame::normal(msg)?.to_text()?;
    transport.send(&text)?;
    Ok(())
}

/// Drive a session from UI commands and transport callbacks until
/// either channel closes; returns the session for inspection.
pub async fn run_session<T: Transport>(
    mut session: Session<T>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
) -> Session<T> {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => session.execute(cmd).await,
                None => break,
            },
            event = transport_rx.recv() => match event {
                Some(event) => session.handle_transport_event(event).await,
                None => break,
            },
        }
    }
    tracing::info!("Session loop stopped");
    session
}
