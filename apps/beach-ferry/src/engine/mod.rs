//! The transport engine seam: whatever performs connectivity checks, encryption
//! and the data channel once peers have exchanged negotiation payloads.

pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pier_proto::Role;
use thiserror::Error;

use crate::event::EventSink;

pub use self::webrtc::{WebRtcEngine, WebRtcEngineFactory};

/// Something the engine reports on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A locally gathered candidate, already encoded for relay.
    LocalCandidate(String),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(Bytes),
    /// The underlying connection failed and will not recover.
    Failed(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("invalid negotiation payload: {0}")]
    InvalidPayload(String),
    #[error("connection failed: {0}")]
    Failed(String),
    #[error("data channel is not open")]
    ChannelUnavailable,
}

/// Negotiation operations driven by the orchestrator. Payloads are opaque strings
/// that the signaling service relays verbatim.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Creates and applies the local offer, returning its relay payload.
    async fn create_offer(&self) -> Result<String, EngineError>;

    /// Creates and applies the local answer, returning its relay payload.
    async fn create_answer(&self) -> Result<String, EngineError>;

    async fn apply_remote_description(&self, payload: &str) -> Result<(), EngineError>;

    async fn apply_remote_candidate(&self, payload: &str) -> Result<(), EngineError>;

    async fn send(&self, data: Bytes) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Builds one engine per session, wired to report into `events`.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        role: Role,
        events: EventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError>;
}
