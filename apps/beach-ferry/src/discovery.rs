use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pier_proto::{PeerId, PeerIdentity, Role, SignalError, Token, MAX_PEERS_PER_TOKEN};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{RetryError, RetryPolicy};
use crate::config::SessionSettings;
use crate::error::{ClientError, DiscoveryError};
use crate::signaling::SignalingApi;

/// What a client knows once its counterpart has shown up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: PeerId,
    pub token: Token,
    pub role: Role,
    pub peers: Vec<PeerIdentity>,
}

impl ConnectionInfo {
    /// The peer playing the opposite role, if it has registered.
    pub fn counterpart(&self) -> Option<&PeerIdentity> {
        let wanted = self.role.counterpart();
        self.peers.iter().find(|peer| peer.mode == wanted)
    }
}

/// Registers under a token and waits for the other side to appear.
pub struct PeerDiscovery {
    api: Arc<dyn SignalingApi>,
    poll_interval: Duration,
    deadline: Option<Duration>,
    retry: RetryPolicy,
}

impl PeerDiscovery {
    pub fn new(api: Arc<dyn SignalingApi>, settings: &SessionSettings) -> Self {
        Self {
            api,
            poll_interval: settings.poll_interval,
            deadline: settings.discovery_timeout,
            retry: settings.retry.clone(),
        }
    }

    pub async fn register(
        &self,
        token: &Token,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<PeerIdentity, DiscoveryError> {
        let unanswered = AtomicBool::new(false);
        let lost_reply = &unanswered;
        let result = self
            .retry
            .retry("register", cancel, || async move {
                let result = self.api.register(token, role).await;
                if let Err(err) = &result {
                    if err.may_have_applied() {
                        lost_reply.store(true, Ordering::SeqCst);
                    }
                }
                result
            })
            .await;
        let id = match result {
            Ok(id) => id,
            Err(RetryError::Cancelled) => return Err(DiscoveryError::Cancelled),
            Err(RetryError::Client(err))
                if unanswered.load(Ordering::SeqCst)
                    && matches!(
                        err.rejection(),
                        Some(SignalError::RoleTaken { .. } | SignalError::TokenFull { .. })
                    ) =>
            {
                match self.reclaim(token, role).await? {
                    Some(id) => {
                        warn!(
                            token = %token,
                            peer_id = %id,
                            role = %role,
                            "recovered registration whose reply was lost"
                        );
                        id
                    }
                    None => return Err(DiscoveryError::from(err)),
                }
            }
            Err(RetryError::Client(err)) => return Err(DiscoveryError::from(err)),
        };
        info!(token = %token, peer_id = %id, role = %role, "registered with signaling");
        Ok(PeerIdentity {
            id,
            token: token.clone(),
            mode: role,
        })
    }

    /// Polls the peer list until it is non-empty.
    pub async fn await_peers(
        &self,
        me: &PeerIdentity,
        cancel: &CancellationToken,
    ) -> Result<ConnectionInfo, DiscoveryError> {
        let started = Instant::now();
        let deadline = self.deadline.map(|limit| started + limit);
        let mut failures = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                result = self.api.list_peers(&me.token, me.id) => result,
            };

            let delay = match result {
                Ok(peers) if !peers.is_empty() => {
                    info!(
                        token = %me.token,
                        peer_id = %me.id,
                        peers = peers.len(),
                        "counterpart discovered"
                    );
                    return Ok(ConnectionInfo {
                        id: me.id,
                        token: me.token.clone(),
                        role: me.mode,
                        peers,
                    });
                }
                Ok(_) => {
                    failures = 0;
                    debug!(token = %me.token, peer_id = %me.id, "no peer yet");
                    self.poll_interval
                }
                Err(err) if err.is_retryable() && self.retry.allows_retry(failures + 1) => {
                    failures += 1;
                    warn!(
                        token = %me.token,
                        attempt = failures,
                        error = %err,
                        "peer listing failed; backing off"
                    );
                    self.retry.delay_for(failures)
                }
                Err(err) => return Err(DiscoveryError::from(err)),
            };

            let mut wake = Instant::now() + delay;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(self.never_arrived(me, started));
                }
                wake = wake.min(deadline);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                _ = sleep_until(wake) => {}
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(self.never_arrived(me, started));
            }
        }
    }

    pub async fn discover(
        &self,
        token: &Token,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<ConnectionInfo, DiscoveryError> {
        let me = self.register(token, role, cancel).await?;
        self.await_peers(&me, cancel).await
    }

    /// Finds the id holding `role` under `token`. Listing as a registered id
    /// shows everyone else, so the id whose listing lacks `role` is the one
    /// holding it.
    async fn reclaim(&self, token: &Token, role: Role) -> Result<Option<PeerId>, DiscoveryError> {
        let mut candidate = PeerId::FIRST;
        for _ in 0..MAX_PEERS_PER_TOKEN {
            match self.api.list_peers(token, candidate).await {
                Ok(others) if others.iter().all(|peer| peer.mode != role) => {
                    return Ok(Some(candidate));
                }
                Ok(_) => {}
                Err(ClientError::Rejected {
                    source: SignalError::UnknownPeer { .. },
                    ..
                }) => {}
                Err(err) => return Err(DiscoveryError::from(err)),
            }
            candidate = candidate.next();
        }
        Ok(None)
    }

    fn never_arrived(&self, me: &PeerIdentity, started: Instant) -> DiscoveryError {
        DiscoveryError::PeerNeverArrived {
            token: me.token.to_string(),
            waited: started.elapsed(),
        }
    }
}
