//! Copy/paste signaling tokens.
//!
//! An invitation is the host's offer plus every gathered ICE candidate,
//! packed as `base64(gzip(json))` so it survives any chat app or a URL
//! fragment. The response carries the guest's answer the same way.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Largest decompressed token payload accepted from a paste
pub const MAX_TOKEN_JSON: u64 = 1024 * 1024;

/// Offer or answer, serialized as the `type` of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
        }
    }
}

/// One negotiation round: a description and the candidates gathered for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingBundle {
    pub description: SessionDescription,
    pub candidates: Vec<IceCandidate>,
}

/// JSON document inside a token
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum NegotiationPayload {
    NegotiateOffer {
        offer: SessionDescription,
        candidates: Vec<IceCandidate>,
    },
    NegotiateAnswer {
        answer: SessionDescription,
        candidates: Vec<IceCandidate>,
    },
}

impl NegotiationPayload {
    fn tag(&self) -> &'static str {
        match self {
            NegotiationPayload::NegotiateOffer { .. } => "negotiateOffer",
            NegotiationPayload::NegotiateAnswer { .. } => "negotiateAnswer",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("description kind is {found}, expected {expected}")]
    WrongKind { expected: SdpKind, found: SdpKind },
    #[error("failed to serialize token: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to compress token: {0}")]
    Compress(#[from] std::io::Error),
}

/// A pasted token could not be turned back into a [`SignalingBundle`].
///
/// Every variant means "invalid or corrupted invitation/response"; the
/// user recovers by asking the peer for a fresh token.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token payload is not valid gzip: {0}")]
    Decompress(std::io::Error),
    #[error("token payload is not valid JSON: {0}")]
    Json(serde_json::Error),
    #[error("token payload has an unexpected shape: {0}")]
    Shape(serde_json::Error),
    #[error("expected a {expected} token, got {found}")]
    WrongTokenType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("description kind is {found}, expected {expected}")]
    WrongKind { expected: SdpKind, found: SdpKind },
}

pub fn encode_offer(
    description: &SessionDescription,
    candidates: &[IceCandidate],
) -> Result<String, EncodeError> {
    check_encode_kind(description, SdpKind::Offer)?;
    encode_payload(&NegotiationPayload::NegotiateOffer {
        offer: description.clone(),
        candidates: candidates.to_vec(),
    })
}

pub fn encode_answer(
    description: &SessionDescription,
    candidates: &[IceCandidate],
) -> Result<String, EncodeError> {
    check_encode_kind(description, SdpKind::Answer)?;
    encode_payload(&NegotiationPayload::NegotiateAnswer {
        answer: description.clone(),
        candidates: candidates.to_vec(),
    })
}

pub fn decode_offer(token: &str) -> Result<SignalingBundle, DecodeError> {
    match decode_payload(token)? {
        NegotiationPayload::NegotiateOffer { offer, candidates } => {
            check_decode_kind(&offer, SdpKind::Offer)?;
            Ok(SignalingBundle {
                description: offer,
                candidates,
            })
        }
        other => Err(DecodeError::WrongTokenType {
            expected: "negotiateOffer",
            found: other.tag(),
        }),
    }
}

pub fn decode_answer(token: &str) -> Result<SignalingBundle, DecodeError> {
    match decode_payload(token)? {
        NegotiationPayload::NegotiateAnswer { answer, candidates } => {
            check_decode_kind(&answer, SdpKind::Answer)?;
            Ok(SignalingBundle {
                description: answer,
                candidates,
            })
        }
        other => Err(DecodeError::WrongTokenType {
            expected: "negotiateAnswer",
            found: other.tag(),
        }),
    }
}

/// Extract a token carried in the fragment of an invitation link.
///
/// Returns `None` for unparseable URLs and empty fragments.
pub fn invite_token_from_url(link: &str) -> Option<String> {
    let parsed = url::Url::parse(link.trim()).ok()?;
    let fragment = parsed.fragment()?.trim();
    if fragment.is_empty() {
        return None;
    }
    Some(fragment.to_string())
}

fn check_encode_kind(description: &SessionDescription, expected: SdpKind) -> Result<(), EncodeError> {
    if description.kind != expected {
        return Err(EncodeError::WrongKind {
            expected,
            found: description.kind,
        });
    }
    Ok(())
}

fn check_decode_kind(description: &SessionDescription, expected: SdpKind) -> Result<(), DecodeError> {
    if description.kind != expected {
        return Err(DecodeError::WrongKind {
            expected,
            found: description.kind,
        });
    }
    Ok(())
}

fn encode_payload(payload: &NegotiationPayload) -> Result<String, EncodeError> {
    let json = serde_json::to_vec(payload)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

fn decode_payload(token: &str) -> Result<NegotiationPayload, DecodeError> {
    // 1. base64
    let compressed = STANDARD.decode(token.trim())?;

    // 2. gzip
    let mut json = String::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_TOKEN_JSON + 1)
        .read_to_string(&mut json)
        .map_err(DecodeError::Decompress)?;
    if json.len() as u64 > MAX_TOKEN_JSON {
        return Err(DecodeError::Decompress(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("payload exceeds {} bytes", MAX_TOKEN_JSON),
        )));
    }

    // 3. JSON, then shape
    let value: serde_json::Value = serde_json::from_str(&json).map_err(DecodeError::Json)?;
    serde_json::from_value(value).map_err(DecodeError::Shape)
}
