use std::time::Duration;

use pier_proto::SignalError;
use thiserror::Error;

use crate::engine::EngineError;
use crate::orchestrator::HandshakeState;

/// Failure of a single call against the signaling service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("signaling request {operation} failed: {reason}")]
    Network {
        operation: &'static str,
        reason: String,
    },
    #[error("signaling request {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("signaling rejected {operation}: {source}")]
    Rejected {
        operation: &'static str,
        #[source]
        source: SignalError,
    },
    #[error("signaling returned status {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("could not decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { .. } | ClientError::Timeout { .. } => true,
            ClientError::Rejected { source, .. } => source.is_retryable(),
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode { .. } => false,
        }
    }

    /// Whether the service may have applied the request even though no reply
    /// arrived.
    pub fn may_have_applied(&self) -> bool {
        matches!(
            self,
            ClientError::Network { .. } | ClientError::Timeout { .. }
        )
    }

    pub fn rejection(&self) -> Option<&SignalError> {
        match self {
            ClientError::Rejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery cancelled")]
    Cancelled,
    #[error("no peer joined token {token} within {waited:?}")]
    PeerNeverArrived { token: String, waited: Duration },
    #[error("signaling service rejected discovery: {0}")]
    Rejected(#[source] SignalError),
    #[error("signaling service unreachable: {0}")]
    Unreachable(#[source] ClientError),
}

impl From<ClientError> for DiscoveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rejected { source, .. } => DiscoveryError::Rejected(source),
            other => DiscoveryError::Unreachable(other),
        }
    }
}

/// A failed handshake. Every variant names the state the session was in.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("protocol violation while {state}: {reason}")]
    Protocol {
        state: HandshakeState,
        reason: String,
    },
    #[error("transport engine failed while {state}: {source}")]
    Transport {
        state: HandshakeState,
        #[source]
        source: EngineError,
    },
    #[error("signaling unreachable while {state}: {source}")]
    Network {
        state: HandshakeState,
        #[source]
        source: ClientError,
    },
    #[error("signaling rejected request while {state}: {source}")]
    Rejected {
        state: HandshakeState,
        #[source]
        source: SignalError,
    },
    #[error("discovery failed while {state}: {source}")]
    Discovery {
        state: HandshakeState,
        #[source]
        source: DiscoveryError,
    },
    #[error("handshake cancelled while {state}")]
    Cancelled { state: HandshakeState },
    #[error("data channel closed while {state}")]
    ChannelClosed { state: HandshakeState },
}

impl HandshakeError {
    pub fn state(&self) -> HandshakeState {
        match self {
            HandshakeError::Protocol { state, .. }
            | HandshakeError::Transport { state, .. }
            | HandshakeError::Network { state, .. }
            | HandshakeError::Rejected { state, .. }
            | HandshakeError::Discovery { state, .. }
            | HandshakeError::Cancelled { state }
            | HandshakeError::ChannelClosed { state } => *state,
        }
    }

    pub(crate) fn from_client(state: HandshakeState, err: ClientError) -> Self {
        match err {
            ClientError::Rejected { source, .. } => HandshakeError::Rejected { state, source },
            other => HandshakeError::Network {
                state,
                source: other,
            },
        }
    }

    pub(crate) fn from_discovery(state: HandshakeState, err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Cancelled => HandshakeError::Cancelled { state },
            other => HandshakeError::Discovery {
                state,
                source: other,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid signaling url {url:?}: {source}")]
    InvalidSignalUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("signaling url must use http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
}
