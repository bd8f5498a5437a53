use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SignalError;

/// Longest token accepted by the service, in bytes.
pub const MAX_TOKEN_LEN: usize = 256;

/// Opaque shared string naming a rendezvous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Validates a raw token. Surrounding whitespace is not significant.
    pub fn parse(raw: &str) -> Result<Self, SignalError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SignalError::InvalidToken {
                reason: "token must not be empty".into(),
            });
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(SignalError::InvalidToken {
                reason: format!("token exceeds {MAX_TOKEN_LEN} bytes"),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Token {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Token::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl FromStr for Token {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::parse(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the negotiation a peer plays.
///
/// The wire form keeps the historical single-letter codes: `"S"` for the
/// initiator (sender) and `"R"` for the responder (receiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "S")]
    Initiator,
    #[serde(rename = "R")]
    Responder,
}

impl Role {
    pub fn code(self) -> &'static str {
        match self {
            Role::Initiator => "S",
            Role::Responder => "R",
        }
    }

    pub fn counterpart(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

impl FromStr for Role {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "S" | "s" => Ok(Role::Initiator),
            "R" | "r" => Ok(Role::Responder),
            other => Err(SignalError::InvalidRole {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Identifier assigned by the registry, sequential per token starting at 1.
/// Serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(u32);

impl PeerId {
    pub const FIRST: PeerId = PeerId(1);

    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> PeerId {
        PeerId(self.0.saturating_add(1))
    }
}

impl FromStr for PeerId {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(PeerId::new)
            .ok_or_else(|| SignalError::InvalidPeerId {
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for PeerId {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer registered under a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub token: Token,
    pub mode: Role,
}
