use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use pier_proto::{PeerId, RelayMessage, SignalError, Token};

use crate::registry::PeerRegistry;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 10;

/// Per-peer bounded FIFO queues of relayed messages.
///
/// Registry lookups complete before the mailbox shard is locked; the two maps are
/// never held at the same time.
pub struct MailboxStore {
    registry: Arc<PeerRegistry>,
    boxes: DashMap<Token, HashMap<PeerId, VecDeque<RelayMessage>>>,
    capacity: usize,
}

impl MailboxStore {
    pub fn new(registry: Arc<PeerRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            boxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queues `message` for its recipient and returns the resulting queue depth.
    /// A full mailbox rejects the message; nothing already queued is dropped.
    pub fn post(&self, message: RelayMessage) -> Result<usize, SignalError> {
        let token = message.token.clone();
        if !self.registry.has_token(&token) {
            return Err(SignalError::UnknownToken {
                token: token.to_string(),
            });
        }
        for peer in [message.from, message.to] {
            if !self.registry.contains(&token, peer) {
                return Err(SignalError::UnknownPeer {
                    token: token.to_string(),
                    peer,
                });
            }
        }
        self.registry.touch(&token);

        let recipient = message.to;
        let mut mailboxes = self.boxes.entry(token.clone()).or_default();
        let queue = mailboxes.entry(recipient).or_default();
        if queue.len() >= self.capacity {
            return Err(SignalError::MailboxFull {
                token: token.to_string(),
                peer: recipient,
                capacity: self.capacity,
            });
        }
        queue.push_back(message);
        Ok(queue.len())
    }

    /// Removes and returns everything queued for `id`, oldest first.
    pub fn drain(&self, token: &Token, id: PeerId) -> Result<Vec<RelayMessage>, SignalError> {
        if !self.registry.contains(token, id) {
            return Err(SignalError::UnknownPeer {
                token: token.to_string(),
                peer: id,
            });
        }
        self.registry.touch(token);

        let Some(mut mailboxes) = self.boxes.get_mut(token) else {
            return Ok(Vec::new());
        };
        Ok(mailboxes
            .get_mut(&id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    pub fn remove_token(&self, token: &Token) {
        self.boxes.remove(token);
    }

    /// Drops mailboxes whose token is no longer registered.
    pub fn sweep_orphans(&self) -> usize {
        let before = self.boxes.len();
        self.boxes.retain(|token, _| self.registry.has_token(token));
        before - self.boxes.len()
    }

    pub fn queued_messages(&self) -> usize {
        self.boxes
            .iter()
            .map(|entry| entry.values().map(VecDeque::len).sum::<usize>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pier_proto::{MessageKind, PeerIdentity, Role};

    struct Pair {
        store: MailboxStore,
        token: Token,
        initiator: PeerIdentity,
        responder: PeerIdentity,
    }

    fn pair(capacity: usize) -> Pair {
        let registry = Arc::new(PeerRegistry::new());
        let token = Token::parse("abc").unwrap();
        let initiator = registry.register(&token, Role::Initiator).unwrap();
        let responder = registry.register(&token, Role::Responder).unwrap();
        Pair {
            store: MailboxStore::new(registry, capacity),
            token,
            initiator,
            responder,
        }
    }

    #[test_timeout::timeout]
    fn drain_returns_posts_in_order_then_empty() {
        let p = pair(DEFAULT_MAILBOX_CAPACITY);
        for n in 0..3 {
            let depth = p
                .store
                .post(RelayMessage::candidate(
                    p.token.clone(),
                    p.initiator.id,
                    p.responder.id,
                    format!("c{n}"),
                ))
                .unwrap();
            assert_eq!(depth, n + 1);
        }

        let drained = p.store.drain(&p.token, p.responder.id).unwrap();
        let data: Vec<_> = drained.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(data, ["c0", "c1", "c2"]);
        assert!(p.store.drain(&p.token, p.responder.id).unwrap().is_empty());
        assert!(p.store.drain(&p.token, p.initiator.id).unwrap().is_empty());
    }

    #[test_timeout::timeout]
    fn unknown_type_is_relayed_untouched() {
        let p = pair(DEFAULT_MAILBOX_CAPACITY);
        let mut message =
            RelayMessage::session_description(p.token.clone(), p.responder.id, p.initiator.id, "x");
        message.kind = MessageKind::Unknown("BYE".into());
        p.store.post(message.clone()).unwrap();
        assert_eq!(p.store.drain(&p.token, p.initiator.id).unwrap(), vec![message]);
    }

    #[test_timeout::timeout]
    fn full_mailbox_rejects_without_dropping() {
        let p = pair(2);
        let post = |data: &str| {
            p.store.post(RelayMessage::candidate(
                p.token.clone(),
                p.initiator.id,
                p.responder.id,
                data,
            ))
        };
        post("a").unwrap();
        post("b").unwrap();
        assert!(matches!(
            post("c"),
            Err(SignalError::MailboxFull { capacity: 2, .. })
        ));
        let data: Vec<_> = p
            .store
            .drain(&p.token, p.responder.id)
            .unwrap()
            .into_iter()
            .map(|m| m.data)
            .collect();
        assert_eq!(data, ["a", "b"]);
        post("c").unwrap();
    }

    #[test_timeout::timeout]
    fn post_requires_registered_token_and_peers() {
        let p = pair(DEFAULT_MAILBOX_CAPACITY);
        let other = Token::parse("other").unwrap();
        assert!(matches!(
            p.store.post(RelayMessage::candidate(
                other,
                p.initiator.id,
                p.responder.id,
                "x"
            )),
            Err(SignalError::UnknownToken { .. })
        ));

        let stranger = p.responder.id.next();
        assert!(matches!(
            p.store.post(RelayMessage::candidate(
                p.token.clone(),
                p.initiator.id,
                stranger,
                "x"
            )),
            Err(SignalError::UnknownPeer { peer, .. }) if peer == stranger
        ));
        assert!(matches!(
            p.store.drain(&p.token, stranger),
            Err(SignalError::UnknownPeer { .. })
        ));
        assert_eq!(p.store.queued_messages(), 0);
    }

    #[test_timeout::timeout]
    fn orphaned_mailboxes_are_swept() {
        let registry = Arc::new(PeerRegistry::new());
        let token = Token::parse("abc").unwrap();
        let a = registry.register(&token, Role::Initiator).unwrap();
        let b = registry.register(&token, Role::Responder).unwrap();
        let store = MailboxStore::new(registry.clone(), 4);
        store
            .post(RelayMessage::candidate(token.clone(), a.id, b.id, "x"))
            .unwrap();

        registry.remove_idle(
            std::time::Instant::now() + std::time::Duration::from_secs(5),
            std::time::Duration::from_secs(1),
        );
        assert_eq!(store.sweep_orphans(), 1);
        assert_eq!(store.queued_messages(), 0);
    }
}
