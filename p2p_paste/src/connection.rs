//! Connection lifecycle for the host and guest flows.
//!
//! [`transition`] is a pure function; [`ConnectionStateMachine`] owns the
//! current state and publishes every change on a watch channel.

use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Host role, nothing created yet
    Idle,
    HostCreatingInvite,
    HostInviteCreated {
        invite_token: String,
        copied: bool,
    },
    HostResponseAccepted {
        invite_token: String,
        response_token: String,
    },
    GuestStart {
        invite_token: String,
    },
    GuestInviteAccepted {
        invite_token: String,
    },
    GuestInviteRejected {
        invite_token: String,
    },
    GuestResponseCreated {
        invite_token: String,
        response_token: String,
        copied: bool,
    },
    Connected {
        is_live: bool,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    CreateInvitation,
    CreateInvitationOk { token: String },
    CreateInvitationFailed { reason: String },
    CopyInvitation,
    ReceiveAndAcceptResponse { token: String },
    AcceptInvitation,
    RejectInvitation,
    CreateResponse { token: String },
    CreateResponseFailed { reason: String },
    CopyResponse,
    EstablishConnection,
    Disconnect,
    /// Transport gave up before or while connecting
    TransportFailed { reason: String },
}

impl ConnectionState {
    /// Initial state from bootstrap data: an inbound token makes this a guest
    pub fn initial(invite_token: Option<String>) -> Self {
        match invite_token {
            Some(invite_token) => ConnectionState::GuestStart { invite_token },
            None => ConnectionState::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::HostCreatingInvite => "host_creating_invite",
            ConnectionState::HostInviteCreated { .. } => "host_invite_created",
            ConnectionState::HostResponseAccepted { .. } => "host_response_accepted",
            ConnectionState::GuestStart { .. } => "guest_start",
            ConnectionState::GuestInviteAccepted { .. } => "guest_invite_accepted",
            ConnectionState::GuestInviteRejected { .. } => "guest_invite_rejected",
            ConnectionState::GuestResponseCreated { .. } => "guest_response_created",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Failed { .. } => "failed",
        }
    }

    /// No listed transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed { .. } | ConnectionState::GuestInviteRejected { .. }
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { is_live: true })
    }

    pub fn invite_token(&self) -> Option<&str> {
        match self {
            ConnectionState::HostInviteCreated { invite_token, .. }
            | ConnectionState::HostResponseAccepted { invite_token, .. }
            | ConnectionState::GuestStart { invite_token }
            | ConnectionState::GuestInviteAccepted { invite_token }
            | ConnectionState::GuestInviteRejected { invite_token }
            | ConnectionState::GuestResponseCreated { invite_token, .. } => Some(invite_token),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::CreateInvitation => "create_invitation",
            ConnectionEvent::CreateInvitationOk { .. } => "create_invitation_ok",
            ConnectionEvent::CreateInvitationFailed { .. } => "create_invitation_failed",
            ConnectionEvent::CopyInvitation => "copy_invitation",
            ConnectionEvent::ReceiveAndAcceptResponse { .. } => "receive_and_accept_response",
            ConnectionEvent::AcceptInvitation => "accept_invitation",
            ConnectionEvent::RejectInvitation => "reject_invitation",
            ConnectionEvent::CreateResponse { .. } => "create_response",
            ConnectionEvent::CreateResponseFailed { .. } => "create_response_failed",
            ConnectionEvent::CopyResponse => "copy_response",
            ConnectionEvent::EstablishConnection => "establish_connection",
            ConnectionEvent::Disconnect => "disconnect",
            ConnectionEvent::TransportFailed { .. } => "transport_failed",
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Next state for `(state, event)`.
///
/// Never panics: a pair with no listed transition yields `Failed` with
/// the offending state and event in the reason.
pub fn transition(state: &ConnectionState, event: ConnectionEvent) -> ConnectionState {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        // Terminal states accept nothing
        (s, e) if s.is_terminal() => unexpected(s, &e),

        // Shared
        (_, E::EstablishConnection) => S::Connected { is_live: true },
        (S::Connected { .. }, E::Disconnect) => S::Connected { is_live: false },
        (_, E::TransportFailed { reason }) => S::Failed {
            reason: format!("transport failure: {}", reason),
        },

        // Host
        (S::Idle, E::CreateInvitation) => S::HostCreatingInvite,
        (S::HostCreatingInvite, E::CreateInvitationOk { token }) => S::HostInviteCreated {
            invite_token: token,
            copied: false,
        },
        (S::HostCreatingInvite, E::CreateInvitationFailed { reason }) => S::Failed { reason },
        (S::HostInviteCreated { invite_token, .. }, E::CopyInvitation) => S::HostInviteCreated {
            invite_token: invite_token.clone(),
            copied: true,
        },
        (S::HostInviteCreated { invite_token, .. }, E::ReceiveAndAcceptResponse { token }) => {
            S::HostResponseAccepted {
                invite_token: invite_token.clone(),
                response_token: token,
            }
        }

        // Guest
        (S::GuestStart { invite_token }, E::AcceptInvitation) => S::GuestInviteAccepted {
            invite_token: invite_token.clone(),
        },
        (S::GuestStart { invite_token }, E::RejectInvitation) => S::GuestInviteRejected {
            invite_token: invite_token.clone(),
        },
        (S::GuestInviteAccepted { invite_token }, E::CreateResponse { token }) => {
            S::GuestResponseCreated {
                invite_token: invite_token.clone(),
                response_token: token,
                copied: false,
            }
        }
        (S::GuestInviteAccepted { .. }, E::CreateResponseFailed { reason }) => S::Failed { reason },
        (
            S::GuestResponseCreated {
                invite_token,
                response_token,
                ..
            },
            E::CopyResponse,
        ) => S::GuestResponseCreated {
            invite_token: invite_token.clone(),
            response_token: response_token.clone(),
            copied: true,
        },

        (s, e) => unexpected(s, &e),
    }
}

fn unexpected(state: &ConnectionState, event: &ConnectionEvent) -> ConnectionState {
    ConnectionState::Failed {
        reason: format!("unexpected transition: <{},{}>", state, event),
    }
}

/// Owns the session's connection state
pub struct ConnectionStateMachine {
    state: watch::Sender<ConnectionState>,
}

impl ConnectionStateMachine {
    pub fn new(initial: ConnectionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Start as a guest when a bootstrap token is present, else as an idle host
    pub fn from_bootstrap(invite_token: Option<String>) -> Self {
        Self::new(ConnectionState::initial(invite_token))
    }

    pub fn dispatch(&self, event: ConnectionEvent) -> ConnectionState {
        let current = self.current();
        let event_name = event.name();
        let next = transition(&current, event);

        match &next {
            ConnectionState::Failed { reason } => {
                tracing::warn!("Connection {} --{}--> failed: {}", current, event_name, reason)
            }
            _ => tracing::info!("Connection {} --{}--> {}", current, event_name, next),
        }

        self.state.send_replace(next.clone());
        next
    }

    pub fn current(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
