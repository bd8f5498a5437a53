//! Response bodies of the HTTP surface.

use serde::{Deserialize, Serialize};

use crate::{PeerId, PeerIdentity, RelayMessage, SignalError};

pub const OK: &str = "OK";
pub const POST_ACCEPTED: &str = "OK. Offer Submitted";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub message: String,
    pub peers: Vec<PeerIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub message: String,
    #[serde(default)]
    pub data: Vec<RelayMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: SignalError,
}

impl From<&SignalError> for ErrorBody {
    fn from(err: &SignalError) -> Self {
        Self {
            error: err.to_string(),
            reason: err.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub active_tokens: usize,
    pub active_peers: usize,
    pub queued_messages: usize,
}
