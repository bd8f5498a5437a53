use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PeerId, Token};

const SESSION_DESCRIPTION: &str = "SDP";
const CANDIDATE: &str = "ICE";

/// Type tag of a relayed negotiation artifact.
///
/// Unrecognised tags are preserved verbatim so the service can relay them and the
/// recipient can decide they are a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    SessionDescription,
    Candidate,
    Unknown(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::SessionDescription => SESSION_DESCRIPTION,
            MessageKind::Candidate => CANDIDATE,
            MessageKind::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            SESSION_DESCRIPTION => MessageKind::SessionDescription,
            CANDIDATE => MessageKind::Candidate,
            _ => MessageKind::Unknown(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negotiation artifact addressed from one peer to another under a token.
/// `data` is opaque to the signaling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub token: Token,
    pub from: PeerId,
    pub to: PeerId,
    pub data: String,
}

impl RelayMessage {
    pub fn session_description(
        token: Token,
        from: PeerId,
        to: PeerId,
        data: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::SessionDescription,
            token,
            from,
            to,
            data: data.into(),
        }
    }

    pub fn candidate(token: Token, from: PeerId, to: PeerId, data: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Candidate,
            token,
            from,
            to,
            data: data.into(),
        }
    }
}
