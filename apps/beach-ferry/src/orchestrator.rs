//! Client-side handshake: discovery, offer/answer exchange and candidate relay,
//! ending when the engine reports the data channel open.
//!
//! Engine callbacks and the mailbox poller both feed one ordered event queue. A
//! single task consumes it and owns every piece of handshake state, so deciding
//! whether a local candidate is buffered or relayed never races with applying the
//! remote description.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pier_proto::{MessageKind, PeerIdentity, RelayMessage, Role, Token};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{RetryError, RetryPolicy};
use crate::candidates::PendingCandidates;
use crate::config::SessionSettings;
use crate::discovery::{ConnectionInfo, PeerDiscovery};
use crate::engine::{EngineError, EngineEvent, EngineFactory, TransportEngine};
use crate::error::HandshakeError;
use crate::event::{self, EventSink, SessionEvent, SessionEvents};
use crate::signaling::SignalingApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    Registered,
    PeerKnown,
    OfferCreated,
    OfferSent,
    AwaitingAnswer,
    AwaitingOffer,
    RemoteApplied,
    AnswerCreated,
    AnswerSent,
    Connected,
    Failed,
}

impl HandshakeState {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Registered => "registered",
            HandshakeState::PeerKnown => "peer known",
            HandshakeState::OfferCreated => "offer created",
            HandshakeState::OfferSent => "offer sent",
            HandshakeState::AwaitingAnswer => "awaiting answer",
            HandshakeState::AwaitingOffer => "awaiting offer",
            HandshakeState::RemoteApplied => "remote description applied",
            HandshakeState::AnswerCreated => "answer created",
            HandshakeState::AnswerSent => "answer sent",
            HandshakeState::Connected => "connected",
            HandshakeState::Failed => "failed",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay bookkeeping for one handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCounters {
    pub descriptions_sent: usize,
    pub descriptions_received: usize,
    /// Candidates relayed in total, flushed ones included.
    pub candidates_sent: usize,
    /// Candidates that waited for the remote description.
    pub candidates_flushed: usize,
    pub candidates_received: usize,
}

/// An established session.
pub struct Connected {
    pub info: ConnectionInfo,
    pub peer: PeerIdentity,
    pub engine: Arc<dyn TransportEngine>,
    /// Channel messages and close notifications from here on.
    pub events: SessionEvents,
    pub history: Vec<HandshakeState>,
    pub counters: RelayCounters,
}

impl Connected {
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), EngineError> {
        self.engine.send(data.into()).await
    }

    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.next_engine_event().await
    }

    pub async fn close(self) -> Result<(), EngineError> {
        self.engine.close().await
    }
}

/// Drives one peer from registration to an open data channel.
pub struct ConnectionOrchestrator {
    api: Arc<dyn SignalingApi>,
    engines: Arc<dyn EngineFactory>,
    discovery: PeerDiscovery,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl ConnectionOrchestrator {
    pub fn new(
        api: Arc<dyn SignalingApi>,
        engines: Arc<dyn EngineFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            discovery: PeerDiscovery::new(api.clone(), &settings),
            api,
            engines,
            poll_interval: settings.poll_interval,
            retry: settings.retry,
        }
    }

    pub async fn connect(
        &self,
        token: &Token,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<Connected, HandshakeError> {
        let mut progress = Progress::new(role);

        let me = self
            .discovery
            .register(token, role, cancel)
            .await
            .map_err(|err| progress.fail(HandshakeError::from_discovery(progress.state, err)))?;
        progress.advance(HandshakeState::Registered);

        let info = self
            .discovery
            .await_peers(&me, cancel)
            .await
            .map_err(|err| progress.fail(HandshakeError::from_discovery(progress.state, err)))?;
        let Some(peer) = info.counterpart().cloned() else {
            let err = HandshakeError::Protocol {
                state: progress.state,
                reason: format!("no {} registered under token {token}", role.counterpart()),
            };
            return Err(progress.fail(err));
        };
        progress.advance(HandshakeState::PeerKnown);

        let (sink, mut events) = event::channel();
        let engine = self
            .engines
            .create(role, sink.clone())
            .await
            .map_err(|source| {
                progress.fail(HandshakeError::Transport {
                    state: progress.state,
                    source,
                })
            })?;

        let poll_cancel = cancel.child_token();
        let poller = spawn_poller(
            self.api.clone(),
            me.clone(),
            self.poll_interval,
            self.retry.clone(),
            sink,
            poll_cancel.clone(),
        );

        let mut session = Session {
            api: self.api.as_ref(),
            engine: engine.as_ref(),
            retry: &self.retry,
            me: &me,
            peer: &peer,
            cancel,
            progress,
            pending: PendingCandidates::new(),
            remote_description: None,
            counters: RelayCounters::default(),
        };
        let outcome = session.run(&mut events).await;
        let Session {
            mut progress,
            counters,
            ..
        } = session;

        poll_cancel.cancel();
        if let Err(err) = poller.await {
            warn!(error = %err, "mailbox poller ended abnormally");
        }

        match outcome {
            Ok(()) => {
                progress.advance(HandshakeState::Connected);
                info!(
                    token = %token,
                    peer_id = %me.id,
                    remote_id = %peer.id,
                    candidates_sent = counters.candidates_sent,
                    candidates_received = counters.candidates_received,
                    "data channel open"
                );
                Ok(Connected {
                    info,
                    peer,
                    engine,
                    events,
                    history: progress.history,
                    counters,
                })
            }
            Err(err) => {
                if let Err(close_err) = engine.close().await {
                    debug!(error = %close_err, "engine close after failed handshake");
                }
                Err(progress.fail(err))
            }
        }
    }
}

/// State plus the path taken to reach it.
struct Progress {
    role: Role,
    state: HandshakeState,
    history: Vec<HandshakeState>,
}

impl Progress {
    fn new(role: Role) -> Self {
        Self {
            role,
            state: HandshakeState::Idle,
            history: vec![HandshakeState::Idle],
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!(role = %self.role, from = %self.state, to = %next, "handshake transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(role = %self.role, state = %err.state(), error = %err, "handshake failed");
        self.state = HandshakeState::Failed;
        self.history.push(HandshakeState::Failed);
        err
    }
}

struct Session<'a> {
    api: &'a dyn SignalingApi,
    engine: &'a dyn TransportEngine,
    retry: &'a RetryPolicy,
    me: &'a PeerIdentity,
    peer: &'a PeerIdentity,
    cancel: &'a CancellationToken,
    progress: Progress,
    pending: PendingCandidates,
    /// Payload of the applied remote description.
    remote_description: Option<String>,
    counters: RelayCounters,
}

impl Session<'_> {
    fn state(&self) -> HandshakeState {
        self.progress.state
    }

    async fn run(&mut self, events: &mut SessionEvents) -> Result<(), HandshakeError> {
        match self.me.mode {
            Role::Initiator => {
                let offer = self.engine.create_offer().await.map_err(|e| self.transport(e))?;
                self.progress.advance(HandshakeState::OfferCreated);
                self.relay(MessageKind::SessionDescription, offer).await?;
                self.progress.advance(HandshakeState::OfferSent);
                self.progress.advance(HandshakeState::AwaitingAnswer);
            }
            Role::Responder => self.progress.advance(HandshakeState::AwaitingOffer),
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(HandshakeError::Cancelled { state: self.state() });
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return Err(HandshakeError::ChannelClosed {
                    state: self.state(),
                });
            };

            match event {
                SessionEvent::Engine(EngineEvent::LocalCandidate(candidate)) => {
                    match self.pending.admit(candidate) {
                        Some(candidate) => {
                            self.relay(MessageKind::Candidate, candidate).await?;
                        }
                        None => trace!(
                            buffered = self.pending.len(),
                            "candidate held until remote description"
                        ),
                    }
                }
                SessionEvent::Engine(EngineEvent::ChannelOpen) => {
                    if !self.pending.is_open() {
                        return Err(self.protocol("channel opened before remote description"));
                    }
                    return Ok(());
                }
                SessionEvent::Engine(EngineEvent::ChannelClosed) => {
                    return Err(HandshakeError::ChannelClosed {
                        state: self.state(),
                    });
                }
                SessionEvent::Engine(EngineEvent::Failed(reason)) => {
                    return Err(self.transport(EngineError::Failed(reason)));
                }
                SessionEvent::Engine(EngineEvent::ChannelMessage(data)) => {
                    debug!(len = data.len(), "dropping channel message received before open");
                }
                SessionEvent::Inbound(messages) => {
                    for message in messages {
                        self.handle_inbound(message).await?;
                    }
                }
                SessionEvent::PollFailed(err) => {
                    return Err(HandshakeError::from_client(self.state(), err));
                }
            }
        }
    }

    async fn handle_inbound(&mut self, message: RelayMessage) -> Result<(), HandshakeError> {
        if message.from != self.peer.id {
            return Err(self.protocol(format!(
                "message from peer {} while paired with {}",
                message.from, self.peer.id
            )));
        }
        match message.kind {
            MessageKind::SessionDescription => self.apply_description(&message.data).await,
            MessageKind::Candidate => {
                self.engine
                    .apply_remote_candidate(&message.data)
                    .await
                    .map_err(|e| self.transport(e))?;
                self.counters.candidates_received += 1;
                Ok(())
            }
            MessageKind::Unknown(kind) => {
                Err(self.protocol(format!("unexpected message type {kind:?}")))
            }
        }
    }

    async fn apply_description(&mut self, payload: &str) -> Result<(), HandshakeError> {
        // A post retried after a lost reply can queue the same description twice.
        match self.remote_description.as_deref() {
            Some(applied) if applied == payload => {
                debug!("ignoring repeated session description");
                return Ok(());
            }
            Some(_) => return Err(self.protocol("conflicting session description")),
            None => {}
        }
        self.engine
            .apply_remote_description(payload)
            .await
            .map_err(|e| self.transport(e))?;
        self.remote_description = Some(payload.to_owned());
        self.counters.descriptions_received += 1;
        self.progress.advance(HandshakeState::RemoteApplied);

        if self.me.mode == Role::Responder {
            let answer = self.engine.create_answer().await.map_err(|e| self.transport(e))?;
            self.progress.advance(HandshakeState::AnswerCreated);
            self.relay(MessageKind::SessionDescription, answer).await?;
            self.progress.advance(HandshakeState::AnswerSent);
        }

        let flushed = self.pending.open();
        debug!(count = flushed.len(), "flushing buffered candidates");
        for candidate in flushed {
            self.relay(MessageKind::Candidate, candidate).await?;
            self.counters.candidates_flushed += 1;
        }
        Ok(())
    }

    async fn relay(&mut self, kind: MessageKind, data: String) -> Result<(), HandshakeError> {
        let message = RelayMessage {
            kind: kind.clone(),
            token: self.me.token.clone(),
            from: self.me.id,
            to: self.peer.id,
            data,
        };
        let api = self.api;
        self.retry
            .retry("post_message", self.cancel, || api.post_message(&message))
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => HandshakeError::Cancelled {
                    state: self.progress.state,
                },
                RetryError::Client(err) => HandshakeError::from_client(self.progress.state, err),
            })?;
        match kind {
            MessageKind::SessionDescription => self.counters.descriptions_sent += 1,
            _ => self.counters.candidates_sent += 1,
        }
        trace!(kind = %kind, to = %self.peer.id, "relayed");
        Ok(())
    }

    fn protocol(&self, reason: impl Into<String>) -> HandshakeError {
        HandshakeError::Protocol {
            state: self.state(),
            reason: reason.into(),
        }
    }

    fn transport(&self, source: EngineError) -> HandshakeError {
        HandshakeError::Transport {
            state: self.state(),
            source,
        }
    }
}

/// Drains the mailbox on a fixed interval, backing off on failures, until
/// `cancel` fires or the session stops listening.
fn spawn_poller(
    api: Arc<dyn SignalingApi>,
    me: PeerIdentity,
    interval: Duration,
    retry: RetryPolicy,
    sink: EventSink,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = api.drain_messages(&me.token, me.id) => result,
            };
            let delay = match result {
                Ok(messages) => {
                    failures = 0;
                    if !messages.is_empty() {
                        trace!(peer_id = %me.id, count = messages.len(), "drained mailbox");
                        if !sink.inbound(messages) {
                            break;
                        }
                    }
                    interval
                }
                Err(err) if err.is_retryable() && retry.allows_retry(failures + 1) => {
                    failures += 1;
                    warn!(
                        peer_id = %me.id,
                        attempt = failures,
                        error = %err,
                        "mailbox poll failed; backing off"
                    );
                    retry.delay_for(failures)
                }
                Err(err) => {
                    sink.poll_failed(err);
                    break;
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(peer_id = %me.id, "mailbox poller stopped");
    })
}
