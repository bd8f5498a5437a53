use std::time::{Duration, Instant};

use dashmap::DashMap;
use pier_proto::{PeerId, PeerIdentity, Role, SignalError, Token, MAX_PEERS_PER_TOKEN};

/// Token-scoped peer table. Each token lives in its own dashmap shard entry, so
/// registrations under different tokens never contend.
#[derive(Default)]
pub struct PeerRegistry {
    tokens: DashMap<Token, TokenPeers>,
}

struct TokenPeers {
    peers: Vec<PeerIdentity>,
    next_id: PeerId,
    last_activity: Instant,
}

impl TokenPeers {
    fn new(now: Instant) -> Self {
        Self {
            peers: Vec::with_capacity(MAX_PEERS_PER_TOKEN),
            next_id: PeerId::FIRST,
            last_activity: now,
        }
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &Token, role: Role) -> Result<PeerIdentity, SignalError> {
        let now = Instant::now();
        let mut entry = self
            .tokens
            .entry(token.clone())
            .or_insert_with(|| TokenPeers::new(now));

        if entry.peers.len() >= MAX_PEERS_PER_TOKEN {
            return Err(SignalError::TokenFull {
                token: token.to_string(),
                limit: MAX_PEERS_PER_TOKEN,
            });
        }
        if entry.peers.iter().any(|peer| peer.mode == role) {
            return Err(SignalError::RoleTaken {
                token: token.to_string(),
                role,
            });
        }

        let identity = PeerIdentity {
            id: entry.next_id,
            token: token.clone(),
            mode: role,
        };
        entry.next_id = entry.next_id.next();
        entry.last_activity = now;
        entry.peers.push(identity.clone());
        Ok(identity)
    }

    /// Every peer under `token` except the requester, in registration order.
    pub fn list_peers(
        &self,
        token: &Token,
        requester: PeerId,
    ) -> Result<Vec<PeerIdentity>, SignalError> {
        let unknown = || SignalError::UnknownPeer {
            token: token.to_string(),
            peer: requester,
        };
        let mut entry = self.tokens.get_mut(token).ok_or_else(unknown)?;
        if !entry.peers.iter().any(|peer| peer.id == requester) {
            return Err(unknown());
        }
        entry.last_activity = Instant::now();
        Ok(entry
            .peers
            .iter()
            .filter(|peer| peer.id != requester)
            .cloned()
            .collect())
    }

    pub fn contains(&self, token: &Token, id: PeerId) -> bool {
        self.tokens
            .get(token)
            .map(|entry| entry.peers.iter().any(|peer| peer.id == id))
            .unwrap_or(false)
    }

    pub fn has_token(&self, token: &Token) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn touch(&self, token: &Token) {
        if let Some(mut entry) = self.tokens.get_mut(token) {
            entry.last_activity = Instant::now();
        }
    }

    /// Drops tokens untouched for at least `idle_timeout`, returning them.
    pub fn remove_idle(&self, now: Instant, idle_timeout: Duration) -> Vec<Token> {
        let mut removed = Vec::new();
        self.tokens.retain(|token, entry| {
            let idle = now.saturating_duration_since(entry.last_activity) >= idle_timeout;
            if idle {
                removed.push(token.clone());
            }
            !idle
        });
        removed
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn peer_count(&self) -> usize {
        self.tokens.iter().map(|entry| entry.peers.len()).sum()
    }
}
