#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beach_ferry::{
    ClientError, EngineError, EngineEvent, EngineFactory, EventSink, RetryPolicy, SessionSettings,
    SignalingApi, TransportEngine,
};
use beach_pier::{ServiceConfig, SignalingService};
use bytes::Bytes;
use pier_proto::{MessageKind, PeerId, PeerIdentity, RelayMessage, Role, SignalError, Token};

pub fn token(raw: &str) -> Token {
    Token::parse(raw).unwrap()
}

pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(10),
        discovery_timeout: None,
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
            jitter: 0.0,
        },
    }
}

pub fn service() -> SignalingService {
    SignalingService::new(ServiceConfig::default())
}

/// Candidates a fake endpoint produces. `early` ones appear while the local
/// description is created, `late` ones right after the remote description lands.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub early: Vec<String>,
    pub late: Vec<String>,
    /// Report the channel open as soon as the engine exists.
    pub open_early: bool,
}

impl Script {
    pub fn candidates(prefix: &str, early: usize, late: usize) -> Self {
        Self {
            early: (0..early).map(|n| format!("{prefix}-early-{n}")).collect(),
            late: (0..late).map(|n| format!("{prefix}-late-{n}")).collect(),
            open_early: false,
        }
    }

    fn total(&self) -> usize {
        self.early.len() + self.late.len()
    }
}

struct Side {
    sink: EventSink,
    remote_description: Option<String>,
    remote_candidates: Vec<String>,
}

#[derive(Default)]
struct LinkState {
    scripts: HashMap<Role, Script>,
    sides: HashMap<Role, Side>,
    opened: bool,
}

/// In-memory stand-in for a pair of transport engines. The channel opens on both
/// sides once each has the other's description and every scripted candidate.
#[derive(Clone, Default)]
pub struct FakeLink {
    state: Arc<Mutex<LinkState>>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, role: Role, script: Script) -> Self {
        self.state.lock().unwrap().scripts.insert(role, script);
        self
    }

    pub fn remote_candidates(&self, role: Role) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sides
            .get(&role)
            .map(|side| side.remote_candidates.clone())
            .unwrap_or_default()
    }

    pub fn remote_description(&self, role: Role) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .sides
            .get(&role)
            .and_then(|side| side.remote_description.clone())
    }

    fn script(&self, role: Role) -> Script {
        self.state
            .lock()
            .unwrap()
            .scripts
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    fn emit(&self, role: Role, event: EngineEvent) {
        if let Some(side) = self.state.lock().unwrap().sides.get(&role) {
            side.sink.emit(event);
        }
    }

    fn check_open(&self) {
        let mut state = self.state.lock().unwrap();
        if state.opened {
            return;
        }
        let ready = [Role::Initiator, Role::Responder].iter().all(|role| {
            let expected = state
                .scripts
                .get(&role.counterpart())
                .map(Script::total)
                .unwrap_or(0);
            state.sides.get(role).is_some_and(|side| {
                side.remote_description.is_some() && side.remote_candidates.len() >= expected
            })
        });
        if ready {
            state.opened = true;
            for side in state.sides.values() {
                side.sink.emit(EngineEvent::ChannelOpen);
            }
        }
    }
}

#[async_trait]
impl EngineFactory for FakeLink {
    async fn create(
        &self,
        role: Role,
        events: EventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError> {
        let open_early = self.script(role).open_early;
        self.state.lock().unwrap().sides.insert(
            role,
            Side {
                sink: events.clone(),
                remote_description: None,
                remote_candidates: Vec::new(),
            },
        );
        if open_early {
            events.emit(EngineEvent::ChannelOpen);
        }
        Ok(Arc::new(FakeEngine {
            role,
            link: self.clone(),
        }))
    }
}

pub struct FakeEngine {
    role: Role,
    link: FakeLink,
}

impl FakeEngine {
    fn describe(&self, kind: &str) -> String {
        for candidate in self.link.script(self.role).early {
            self.link.emit(self.role, EngineEvent::LocalCandidate(candidate));
        }
        format!("{kind}:{}", self.role.code())
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn create_offer(&self) -> Result<String, EngineError> {
        Ok(self.describe("offer"))
    }

    async fn create_answer(&self) -> Result<String, EngineError> {
        Ok(self.describe("answer"))
    }

    async fn apply_remote_description(&self, payload: &str) -> Result<(), EngineError> {
        {
            let mut state = self.link.state.lock().unwrap();
            let side = state
                .sides
                .get_mut(&self.role)
                .ok_or(EngineError::ChannelUnavailable)?;
            side.remote_description = Some(payload.to_string());
        }
        for candidate in self.link.script(self.role).late {
            self.link.emit(self.role, EngineEvent::LocalCandidate(candidate));
        }
        self.link.check_open();
        Ok(())
    }

    async fn apply_remote_candidate(&self, payload: &str) -> Result<(), EngineError> {
        {
            let mut state = self.link.state.lock().unwrap();
            let side = state
                .sides
                .get_mut(&self.role)
                .ok_or(EngineError::ChannelUnavailable)?;
            if side.remote_description.is_none() {
                return Err(EngineError::Negotiation(
                    "candidate before remote description".into(),
                ));
            }
            side.remote_candidates.push(payload.to_string());
        }
        self.link.check_open();
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), EngineError> {
        self.link
            .emit(self.role.counterpart(), EngineEvent::ChannelMessage(data));
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// [`SignalingApi`] served in-process by the real signaling service, recording
/// every successful post into a journal shared with its forks.
pub struct RecordingSignaling {
    service: SignalingService,
    journal: Arc<Mutex<Vec<RelayMessage>>>,
    drains: AtomicUsize,
    failing_drains: AtomicUsize,
    lost_register_replies: AtomicUsize,
    lost_description_replies: AtomicUsize,
}

impl RecordingSignaling {
    pub fn new(service: SignalingService) -> Self {
        Self {
            service,
            journal: Arc::default(),
            drains: AtomicUsize::new(0),
            failing_drains: AtomicUsize::new(0),
            lost_register_replies: AtomicUsize::new(0),
            lost_description_replies: AtomicUsize::new(0),
        }
    }

    /// Same service and journal, separate counters.
    pub fn fork(&self) -> Self {
        Self {
            service: self.service.clone(),
            journal: self.journal.clone(),
            drains: AtomicUsize::new(0),
            failing_drains: AtomicUsize::new(0),
            lost_register_replies: AtomicUsize::new(0),
            lost_description_replies: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_drains(&self, count: usize) {
        self.failing_drains.store(count, Ordering::SeqCst);
    }

    /// The next `count` registrations are applied but answered with a timeout.
    pub fn lose_register_replies(&self, count: usize) {
        self.lost_register_replies.store(count, Ordering::SeqCst);
    }

    /// The next `count` session description posts are queued but answered with a
    /// timeout.
    pub fn lose_description_replies(&self, count: usize) {
        self.lost_description_replies.store(count, Ordering::SeqCst);
    }

    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<RelayMessage> {
        self.journal.lock().unwrap().clone()
    }

    pub fn service(&self) -> &SignalingService {
        &self.service
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lost_reply(operation: &'static str) -> ClientError {
    ClientError::Timeout {
        operation,
        after: Duration::from_millis(1),
    }
}

fn rejected(operation: &'static str) -> impl FnOnce(SignalError) -> ClientError {
    move |source| ClientError::Rejected { operation, source }
}

#[async_trait]
impl SignalingApi for RecordingSignaling {
    async fn register(&self, token: &Token, role: Role) -> Result<PeerId, ClientError> {
        let id = self
            .service
            .register(token, role)
            .map(|identity| identity.id)
            .map_err(rejected("register"))?;
        if take_one(&self.lost_register_replies) {
            return Err(lost_reply("register"));
        }
        Ok(id)
    }

    async fn list_peers(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<PeerIdentity>, ClientError> {
        self.service
            .list_peers(token, id)
            .map_err(rejected("list_peers"))
    }

    async fn post_message(&self, message: &RelayMessage) -> Result<(), ClientError> {
        self.service
            .post_message(message.clone())
            .map_err(rejected("post_message"))?;
        self.journal.lock().unwrap().push(message.clone());
        if message.kind == MessageKind::SessionDescription
            && take_one(&self.lost_description_replies)
        {
            return Err(lost_reply("post_message"));
        }
        Ok(())
    }

    async fn drain_messages(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<RelayMessage>, ClientError> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_drains.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_drains.store(failing - 1, Ordering::SeqCst);
            return Err(ClientError::Network {
                operation: "drain_messages",
                reason: "injected failure".into(),
            });
        }
        self.service
            .drain_messages(token, id)
            .map_err(rejected("drain_messages"))
    }
}
