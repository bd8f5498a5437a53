//! Beach Ferry: find a peer through Beach Pier and negotiate a direct data
//! channel with it.

pub mod backoff;
pub mod candidates;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod signaling;

pub use backoff::RetryPolicy;
pub use config::{ClientConfig, SessionSettings};
pub use discovery::{ConnectionInfo, PeerDiscovery};
pub use engine::{EngineError, EngineEvent, EngineFactory, TransportEngine};
pub use error::{ClientError, ConfigError, DiscoveryError, HandshakeError};
pub use event::{EventSink, SessionEvent, SessionEvents};
pub use orchestrator::{Connected, ConnectionOrchestrator, HandshakeState, RelayCounters};
pub use signaling::{HttpSignalingClient, SignalingApi};
