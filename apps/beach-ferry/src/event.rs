use pier_proto::RelayMessage;
use tokio::sync::mpsc;

use crate::engine::EngineEvent;
use crate::error::ClientError;

/// Everything the session task reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Engine(EngineEvent),
    /// One non-empty mailbox drain.
    Inbound(Vec<RelayMessage>),
    /// The poller gave up after exhausting its retries.
    PollFailed(ClientError),
}

/// Producer half handed to the engine callbacks and the poller.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Returns false once the session has gone away.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(SessionEvent::Engine(event)).is_ok()
    }

    pub(crate) fn inbound(&self, messages: Vec<RelayMessage>) -> bool {
        self.tx.send(SessionEvent::Inbound(messages)).is_ok()
    }

    pub(crate) fn poll_failed(&self, err: ClientError) -> bool {
        self.tx.send(SessionEvent::PollFailed(err)).is_ok()
    }
}

/// Consumer half, owned by the single task that drives the handshake.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next engine event, skipping relay traffic that arrived after the handshake.
    pub async fn next_engine_event(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await? {
                SessionEvent::Engine(event) => return Some(event),
                SessionEvent::Inbound(messages) => {
                    tracing::debug!(count = messages.len(), "ignoring late signaling messages");
                }
                SessionEvent::PollFailed(err) => {
                    tracing::debug!(error = %err, "ignoring late poll failure");
                }
            }
        }
    }
}

pub fn channel() -> (EventSink, SessionEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, SessionEvents { rx })
}
