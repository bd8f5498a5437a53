use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use pier_proto::{PeerId, PeerIdentity, RelayMessage, Role, SignalError, StatsResponse, Token};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mailbox::{MailboxStore, DEFAULT_MAILBOX_CAPACITY};
use crate::registry::PeerRegistry;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mailbox_capacity: usize,
    pub idle_timeout: Duration,
    pub recycle_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            idle_timeout: Duration::from_secs(600),
            recycle_interval: Duration::from_secs(30),
        }
    }
}

/// The four rendezvous operations over a shared registry and mailbox store.
#[derive(Clone)]
pub struct SignalingService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    registry: Arc<PeerRegistry>,
    mailboxes: MailboxStore,
    config: ServiceConfig,
}

impl SignalingService {
    pub fn new(config: ServiceConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let mailboxes = MailboxStore::new(registry.clone(), config.mailbox_capacity);
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                mailboxes,
                config,
            }),
        }
    }

    pub fn register(&self, token: &Token, role: Role) -> Result<PeerIdentity, SignalError> {
        match self.inner.registry.register(token, role) {
            Ok(identity) => {
                counter!("pier_registrations_total", "outcome" => "ok").increment(1);
                self.record_active_tokens();
                info!(
                    token = %token,
                    peer_id = %identity.id,
                    role = %role,
                    "peer registered"
                );
                Ok(identity)
            }
            Err(err) => {
                counter!("pier_registrations_total", "outcome" => err.code()).increment(1);
                warn!(token = %token, role = %role, error = %err, "registration rejected");
                Err(err)
            }
        }
    }

    pub fn list_peers(
        &self,
        token: &Token,
        requester: PeerId,
    ) -> Result<Vec<PeerIdentity>, SignalError> {
        let peers = self.inner.registry.list_peers(token, requester)?;
        debug!(
            token = %token,
            peer_id = %requester,
            visible = peers.len(),
            "listed peers"
        );
        Ok(peers)
    }

    pub fn post_message(&self, message: RelayMessage) -> Result<usize, SignalError> {
        let kind = message.kind.to_string();
        let token = message.token.clone();
        let (from, to) = (message.from, message.to);
        match self.inner.mailboxes.post(message) {
            Ok(depth) => {
                counter!("pier_messages_posted_total", "kind" => kind.clone()).increment(1);
                debug!(
                    token = %token,
                    from = %from,
                    to = %to,
                    kind = %kind,
                    depth,
                    "message queued"
                );
                Ok(depth)
            }
            Err(err) => {
                counter!("pier_messages_rejected_total", "reason" => err.code()).increment(1);
                warn!(
                    token = %token,
                    from = %from,
                    to = %to,
                    kind = %kind,
                    error = %err,
                    "message rejected"
                );
                Err(err)
            }
        }
    }

    pub fn drain_messages(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<RelayMessage>, SignalError> {
        let messages = self.inner.mailboxes.drain(token, id)?;
        counter!("pier_drains_total").increment(1);
        if !messages.is_empty() {
            debug!(
                token = %token,
                peer_id = %id,
                count = messages.len(),
                "mailbox drained"
            );
        }
        Ok(messages)
    }

    pub fn stats(&self) -> StatsResponse {
        StatsResponse {
            active_tokens: self.inner.registry.token_count(),
            active_peers: self.inner.registry.peer_count(),
            queued_messages: self.inner.mailboxes.queued_messages(),
        }
    }

    /// Forgets tokens idle for longer than the configured timeout, along with
    /// their mailboxes.
    pub fn recycle_idle(&self, now: Instant) -> usize {
        let removed = self
            .inner
            .registry
            .remove_idle(now, self.inner.config.idle_timeout);
        for token in &removed {
            self.inner.mailboxes.remove_token(token);
            info!(token = %token, "recycled idle token");
        }
        let orphans = self.inner.mailboxes.sweep_orphans();
        if orphans > 0 {
            debug!(orphans, "swept orphaned mailboxes");
        }
        if !removed.is_empty() {
            counter!("pier_tokens_recycled_total").increment(removed.len() as u64);
            self.record_active_tokens();
        }
        removed.len()
    }

    pub fn spawn_recycler(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut interval = tokio::time::interval(self.inner.config.recycle_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let _ = service.recycle_idle(Instant::now());
            }
        })
    }

    fn record_active_tokens(&self) {
        gauge!("pier_active_tokens").set(self.inner.registry.token_count() as f64);
    }
}
