//! Framing on the single data channel.
//!
//! Application messages travel as `{"type":"normal","message":"<json>"}`;
//! renegotiation travels as `renegotiateRequest` / `renegotiateResponse`
//! control frames carrying a plain session description.

use serde::{Deserialize, Serialize};

use crate::signaling::{SdpKind, SessionDescription};
use crate::transport::{ChannelState, Transport, TransportError};
use crate::wire::{ValidationRejection, WireMessage, parse_wire_message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelFrame {
    Normal { message: String },
    RenegotiateRequest { offer: SessionDescription },
    RenegotiateResponse { answer: SessionDescription },
}

/// Why an inbound payload never reached a handler
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("malformed channel frame: {0}")]
    MalformedFrame(serde_json::Error),
    #[error(transparent)]
    Rejected(#[from] ValidationRejection),
    #[error("renegotiate {0} frame carries the wrong description kind")]
    WrongDescriptionKind(SdpKind),
}

/// An inbound payload after routing
#[derive(Debug)]
pub enum Inbound {
    Message(WireMessage),
    RenegotiateRequest(SessionDescription),
    RenegotiateResponse(SessionDescription),
    /// Goes to the error path of the normal-message handler, then dropped
    Malformed(ChannelError),
}

impl ChannelFrame {
    pub fn normal(message: &WireMessage) -> serde_json::Result<Self> {
        Ok(ChannelFrame::Normal {
            message: message.to_json()?,
        })
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parse and route one inbound text frame. Never fails: bad input comes
/// back as [`Inbound::Malformed`].
pub fn route_inbound(text: &str) -> Inbound {
    let frame: ChannelFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return Inbound::Malformed(ChannelError::MalformedFrame(e)),
    };

    match frame {
        ChannelFrame::Normal { message } => match parse_wire_message(&message) {
            Ok(msg) => Inbound::Message(msg),
            Err(e) => Inbound::Malformed(e.into()),
        },
        ChannelFrame::RenegotiateRequest { offer } => {
            if offer.kind != SdpKind::Offer {
                return Inbound::Malformed(ChannelError::WrongDescriptionKind(SdpKind::Offer));
            }
            Inbound::RenegotiateRequest(offer)
        }
        ChannelFrame::RenegotiateResponse { answer } => {
            if answer.kind != SdpKind::Answer {
                return Inbound::Malformed(ChannelError::WrongDescriptionKind(SdpKind::Answer));
            }
            Inbound::RenegotiateResponse(answer)
        }
    }
}

/// Local side of the renegotiation exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenegotiationState {
    #[default]
    Stable,
    /// We sent `renegotiateRequest` and wait for the answer
    OfferSent,
}

#[derive(Debug, thiserror::Error)]
pub enum RenegotiationError {
    #[error("cannot renegotiate before the session is connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drives offer/answer over the open data channel
#[derive(Debug, Default)]
pub struct Renegotiator {
    state: RenegotiationState,
}

impl Renegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RenegotiationState {
        self.state
    }

    /// Create an offer and send it as `renegotiateRequest`.
    ///
    /// Allowed while an earlier offer is outstanding, which replaces it;
    /// that is how a lost response is recovered.
    pub async fn start<T: Transport>(
        &mut self,
        transport: &mut T,
        connected: bool,
    ) -> Result<(), RenegotiationError> {
        if !connected || transport.channel_state() != ChannelState::Open {
            return Err(RenegotiationError::NotConnected);
        }
        if self.state == RenegotiationState::OfferSent {
            tracing::warn!("Renegotiation already pending, sending a fresh offer");
        }

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        let text = ChannelFrame::RenegotiateRequest { offer }.to_text()?;
        transport.send(&text)?;

        self.state = RenegotiationState::OfferSent;
        tracing::info!("Sent renegotiation offer");
        Ok(())
    }

    /// Apply the peer's offer and reply with an answer
    pub async fn on_request<T: Transport>(
        &mut self,
        transport: &mut T,
        offer: SessionDescription,
    ) -> Result<(), RenegotiationError> {
        if self.state == RenegotiationState::OfferSent {
            tracing::warn!("Peer offered while our own offer is pending; answering theirs");
            self.state = RenegotiationState::Stable;
        }

        transport.set_remote_description(offer).await?;
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        let text = ChannelFrame::RenegotiateResponse { answer }.to_text()?;
        transport.send(&text)?;

        tracing::info!("Answered renegotiation offer");
        Ok(())
    }

    /// Apply the peer's answer, only if we are waiting for one
    pub async fn on_response<T: Transport>(
        &mut self,
        transport: &mut T,
        answer: SessionDescription,
    ) -> Result<(), RenegotiationError> {
        if self.state != RenegotiationState::OfferSent {
            tracing::warn!("Ignoring renegotiation response, no offer is pending");
            return Ok(());
        }

        self.state = RenegotiationState::Stable;
        transport.set_remote_description(answer).await?;
        tracing::info!("Renegotiation complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_frame_wraps_json_string() {
        let msg = WireMessage::Chat {
            sent: 3,
            msg: "hello".to_string(),
        };
        let text = ChannelFrame::normal(&msg).unwrap().to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "normal");
        assert!(value["message"].is_string());

        match route_inbound(&text) {
            Inbound::Message(parsed) => assert_eq!(parsed, msg),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_control_frames_route() {
        let text = r#"{"type":"renegotiateRequest","offer":{"type":"offer","sdp":"v=0"}}"#;
        assert!(matches!(route_inbound(text), Inbound::RenegotiateRequest(_)));

        let text = r#"{"type":"renegotiateResponse","answer":{"type":"answer","sdp":"v=0"}}"#;
        assert!(matches!(route_inbound(text), Inbound::RenegotiateResponse(_)));
    }

    #[test]
    fn test_malformed_payloads_are_not_routed() {
        for text in [
            "not json",
            "42",
            r#"{"type":"unknown"}"#,
            r#"{"type":"normal","message":7}"#,
            r#"{"type":"normal","message":"{\"type\":\"mystery\"}"}"#,
            r#"{"type":"normal","message":"{broken"}"#,
            r#"{"type":"renegotiateRequest","offer":{"type":"answer","sdp":"x"}}"#,
        ] {
            assert!(
                matches!(route_inbound(text), Inbound::Malformed(_)),
                "{} should be malformed",
                text
            );
        }
    }
}
