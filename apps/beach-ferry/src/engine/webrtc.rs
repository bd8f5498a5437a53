use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pier_proto::Role;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{EngineError, EngineEvent, EngineFactory, TransportEngine};
use crate::event::EventSink;

const DATA_CHANNEL_LABEL: &str = "data";

/// Relay form of a session description.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SdpPayload {
    sdp: String,
    #[serde(rename = "type")]
    typ: String,
}

/// [`TransportEngine`] backed by a `webrtc` peer connection with one ordered
/// data channel.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<AsyncMutex<Option<Arc<RTCDataChannel>>>>,
}

impl WebRtcEngine {
    pub async fn new(
        role: Role,
        ice_servers: Vec<String>,
        events: EventSink,
    ) -> Result<Self, EngineError> {
        let api = build_api()?;
        let config = RTCConfiguration {
            ice_servers: if ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: ice_servers,
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(to_setup_error)?,
        );

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    tracing::trace!(target = "webrtc", "candidate gathering complete");
                    return;
                };
                match candidate
                    .to_json()
                    .map_err(|err| err.to_string())
                    .and_then(|init| serde_json::to_string(&init).map_err(|err| err.to_string()))
                {
                    Ok(payload) => {
                        events.emit(EngineEvent::LocalCandidate(payload));
                    }
                    Err(err) => {
                        tracing::warn!(target = "webrtc", error = %err, "failed to encode local candidate");
                    }
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let events = state_events.clone();
            Box::pin(async move {
                tracing::debug!(target = "webrtc", ?state, "peer connection state changed");
                if state == RTCPeerConnectionState::Failed {
                    events.emit(EngineEvent::Failed("peer connection failed".into()));
                }
            })
        }));

        let channel = Arc::new(AsyncMutex::new(None));
        match role {
            Role::Initiator => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
                    .await
                    .map_err(to_setup_error)?;
                wire_channel(&dc, &events);
                *channel.lock().await = Some(dc);
            }
            Role::Responder => {
                let slot = Arc::clone(&channel);
                let channel_events = events.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = Arc::clone(&slot);
                    let events = channel_events.clone();
                    Box::pin(async move {
                        tracing::debug!(target = "webrtc", label = dc.label(), "remote data channel announced");
                        wire_channel(&dc, &events);
                        *slot.lock().await = Some(dc);
                    })
                }));
            }
        }

        Ok(Self { pc, channel })
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: &EventSink) {
    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            tracing::debug!(target = "webrtc", "data channel opened");
            events.emit(EngineEvent::ChannelOpen);
        })
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            tracing::debug!(target = "webrtc", "data channel closed");
            events.emit(EngineEvent::ChannelClosed);
        })
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            tracing::trace!(target = "webrtc", frame_len = msg.data.len(), "data channel message");
            events.emit(EngineEvent::ChannelMessage(msg.data));
        })
    }));
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<String, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(to_negotiation_error)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(to_negotiation_error)?;
        encode_description(&offer)
    }

    async fn create_answer(&self) -> Result<String, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(to_negotiation_error)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(to_negotiation_error)?;
        encode_description(&answer)
    }

    async fn apply_remote_description(&self, payload: &str) -> Result<(), EngineError> {
        let payload: SdpPayload = serde_json::from_str(payload)
            .map_err(|err| EngineError::InvalidPayload(err.to_string()))?;
        let description = session_description_from_payload(&payload)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(to_negotiation_error)
    }

    async fn apply_remote_candidate(&self, payload: &str) -> Result<(), EngineError> {
        let init: RTCIceCandidateInit = serde_json::from_str(payload)
            .map_err(|err| EngineError::InvalidPayload(err.to_string()))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(to_negotiation_error)
    }

    async fn send(&self, data: Bytes) -> Result<(), EngineError> {
        let channel = self.channel.lock().await.clone();
        let channel = channel.ok_or(EngineError::ChannelUnavailable)?;
        channel
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Failed(err.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|err| EngineError::Failed(err.to_string()))
    }
}

/// Builds [`WebRtcEngine`]s against a fixed ICE server list.
#[derive(Debug, Clone)]
pub struct WebRtcEngineFactory {
    ice_servers: Vec<String>,
}

impl WebRtcEngineFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(
        &self,
        role: Role,
        events: EventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError> {
        let engine = WebRtcEngine::new(role, self.ice_servers.clone(), events).await?;
        Ok(Arc::new(engine))
    }
}

fn build_api() -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn encode_description(desc: &RTCSessionDescription) -> Result<String, EngineError> {
    let payload = SdpPayload {
        sdp: desc.sdp.clone(),
        typ: desc.sdp_type.to_string(),
    };
    serde_json::to_string(&payload).map_err(|err| EngineError::InvalidPayload(err.to_string()))
}

fn session_description_from_payload(
    payload: &SdpPayload,
) -> Result<RTCSessionDescription, EngineError> {
    let invalid = |err: webrtc::Error| EngineError::InvalidPayload(err.to_string());
    match RTCSdpType::from(payload.typ.as_str()) {
        RTCSdpType::Offer => RTCSessionDescription::offer(payload.sdp.clone()).map_err(invalid),
        RTCSdpType::Answer => RTCSessionDescription::answer(payload.sdp.clone()).map_err(invalid),
        RTCSdpType::Pranswer => {
            RTCSessionDescription::pranswer(payload.sdp.clone()).map_err(invalid)
        }
        RTCSdpType::Rollback | RTCSdpType::Unspecified => Err(EngineError::InvalidPayload(
            format!("unsupported sdp type {}", payload.typ),
        )),
    }
}

fn to_setup_error(err: webrtc::Error) -> EngineError {
    EngineError::Setup(err.to_string())
}

fn to_negotiation_error(err: webrtc::Error) -> EngineError {
    EngineError::Negotiation(err.to_string())
}
