//! Serverless peer-to-peer chat and file sharing.
//!
//! Peers exchange a copy/paste invitation and response token, then talk
//! over one reliable data channel provided by a [`Transport`].

pub mod channel;
pub mod chat_log;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod session;
pub mod signaling;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use chat_log::{ChatLog, LocalMessage, Origin};
pub use config::SessionConfig;
pub use connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
pub use error::SessionError;
pub use session::{Session, run_session};
pub use signaling::{DecodeError, IceCandidate, SessionDescription, SignalingBundle};
pub use transfer::{FileTransferEngine, ReceivedFileStatus, SentFileStatus, TransferError};
pub use transport::{MediaTrack, Transport, TransportEvent};
pub use wire::WireMessage;

//Command from UI to the session
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Host: build an invitation token
    CreateInvitation,
    CopyInvitation,
    /// Host: the guest's pasted response token
    ProcessResponse(String),
    AcceptInvitation,
    RejectInvitation,
    CopyResponse,
    SendChat(String),
    Rename(String),
    SendFile {
        file_name: String,
        mime_type: String,
        contents: Vec<u8>,
    },
    AcceptFile(String),
    RejectFile(String),
    CancelFile(String),
    AddTrack(MediaTrack),
    RemoveTrack(String),
    Renegotiate,
}

//Report from the session to UI
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    LogAppended(LocalMessage),
    SentFileUpdated {
        id: String,
        status: SentFileStatus,
        progress: f32,
    },
    ReceivedFileUpdated {
        id: String,
        status: ReceivedFileStatus,
        progress: f32,
    },
    RemoteTrackAdded(MediaTrack),
    RemoteTrackRemoved(String),
    Error(String),
}
