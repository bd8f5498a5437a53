//! Shared primitives for the Beach Pier rendezvous protocol.
//!
//! Both the signaling service and the client speak the types defined here, so the
//! JSON shapes only live in one place.

mod api;
mod error;
mod message;
mod peer;

pub use api::{
    ErrorBody, HealthStatus, MessagesResponse, PeersResponse, PostResponse, RegisterResponse,
    StatsResponse, OK, POST_ACCEPTED,
};
pub use error::{ErrorKind, SignalError};
pub use message::{MessageKind, RelayMessage};
pub use peer::{PeerId, PeerIdentity, Role, Token, MAX_TOKEN_LEN};

/// Maximum number of peers that may share one rendezvous token.
pub const MAX_PEERS_PER_TOKEN: usize = 2;
