use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PeerId, Role};

/// Failures reported by the rendezvous service.
///
/// Serialized inside [`crate::ErrorBody`] so clients recover the exact variant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalError {
    #[error("token {token} already has {limit} peers")]
    TokenFull { token: String, limit: usize },
    #[error("role {role} is already taken under token {token}")]
    RoleTaken { token: String, role: Role },
    #[error("mailbox of peer {peer} under token {token} is full ({capacity} messages)")]
    MailboxFull {
        token: String,
        peer: PeerId,
        capacity: usize,
    },
    #[error("peer {peer} is not registered under token {token}")]
    UnknownPeer { token: String, peer: PeerId },
    #[error("token {token} has no registered peers")]
    UnknownToken { token: String },
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },
    #[error("invalid mode {value:?}, expected \"S\" or \"R\"")]
    InvalidRole { value: String },
    #[error("invalid peer id {value:?}")]
    InvalidPeerId { value: String },
    #[error("malformed request: {reason}")]
    MalformedBody { reason: String },
}

/// Coarse classification used for status mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capacity,
    Authorization,
    Validation,
}

impl SignalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalError::TokenFull { .. }
            | SignalError::RoleTaken { .. }
            | SignalError::MailboxFull { .. } => ErrorKind::Capacity,
            SignalError::UnknownPeer { .. } => ErrorKind::Authorization,
            SignalError::UnknownToken { .. }
            | SignalError::InvalidToken { .. }
            | SignalError::InvalidRole { .. }
            | SignalError::InvalidPeerId { .. }
            | SignalError::MalformedBody { .. } => ErrorKind::Validation,
        }
    }

    /// Stable snake_case name, matching the serialized `kind` tag.
    pub fn code(&self) -> &'static str {
        match self {
            SignalError::TokenFull { .. } => "token_full",
            SignalError::RoleTaken { .. } => "role_taken",
            SignalError::MailboxFull { .. } => "mailbox_full",
            SignalError::UnknownPeer { .. } => "unknown_peer",
            SignalError::UnknownToken { .. } => "unknown_token",
            SignalError::InvalidToken { .. } => "invalid_token",
            SignalError::InvalidRole { .. } => "invalid_role",
            SignalError::InvalidPeerId { .. } => "invalid_peer_id",
            SignalError::MalformedBody { .. } => "malformed_body",
        }
    }

    /// Only a full mailbox clears up on its own; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignalError::MailboxFull { .. })
    }
}
