use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pier_proto::{
    ErrorBody, ErrorKind, HealthStatus, MessageKind, MessagesResponse, PeerId, PeersResponse,
    PostResponse, RegisterResponse, RelayMessage, Role, SignalError, StatsResponse, Token, OK,
    POST_ACCEPTED,
};
use serde::Deserialize;

use crate::service::SignalingService;

#[derive(Clone)]
pub struct AppState {
    pub service: SignalingService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: SignalingService, metrics: Option<PrometheusHandle>) -> Self {
        Self { service, metrics }
    }
}

/// A [`SignalError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SignalError);

impl From<SignalError> for ApiError {
    fn from(err: SignalError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.kind()) {
            (SignalError::MailboxFull { .. }, _) => StatusCode::TOO_MANY_REQUESTS,
            (_, ErrorKind::Authorization) => StatusCode::UNAUTHORIZED,
            (_, ErrorKind::Capacity | ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterQuery {
    pub token: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PeerQuery {
    pub token: Option<String>,
    pub id: Option<String>,
}

/// Body of `POST /message` before validation. Identifiers stay strings so that
/// each field can be rejected with its own error.
#[derive(Debug, Deserialize)]
pub struct RelayMessageBody {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub token: String,
    pub from: String,
    pub to: String,
    pub data: String,
}

impl TryFrom<RelayMessageBody> for RelayMessage {
    type Error = SignalError;

    fn try_from(body: RelayMessageBody) -> Result<Self, Self::Error> {
        Ok(RelayMessage {
            kind: body.kind,
            token: Token::parse(&body.token)?,
            from: body.from.parse()?,
            to: body.to.parse()?,
            data: body.data,
        })
    }
}

fn parse_token(raw: Option<&str>) -> Result<Token, SignalError> {
    Token::parse(raw.unwrap_or_default())
}

fn parse_peer(token: Option<&str>, id: Option<&str>) -> Result<(Token, PeerId), SignalError> {
    let token = parse_token(token)?;
    let id = id.unwrap_or_default().parse()?;
    Ok((token, id))
}

pub async fn register(
    State(state): State<AppState>,
    Query(query): Query<RegisterQuery>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let token = parse_token(query.token.as_deref())?;
    let role: Role = query.mode.as_deref().unwrap_or_default().parse()?;
    let identity = state.service.register(&token, role)?;
    Ok(Json(RegisterResponse {
        message: OK.to_string(),
        peer_id: identity.id,
    }))
}

pub async fn list_peers(
    State(state): State<AppState>,
    Query(query): Query<PeerQuery>,
) -> Result<Json<PeersResponse>, ApiError> {
    let (token, id) = parse_peer(query.token.as_deref(), query.id.as_deref())?;
    let peers = state.service.list_peers(&token, id)?;
    Ok(Json(PeersResponse {
        message: OK.to_string(),
        peers,
    }))
}

pub async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<RelayMessageBody>, JsonRejection>,
) -> Result<Json<PostResponse>, ApiError> {
    let Json(body) = payload.map_err(|rejection| SignalError::MalformedBody {
        reason: rejection.body_text(),
    })?;
    let message = RelayMessage::try_from(body)?;
    state.service.post_message(message)?;
    Ok(Json(PostResponse {
        message: POST_ACCEPTED.to_string(),
    }))
}

pub async fn drain_messages(
    State(state): State<AppState>,
    Query(query): Query<PeerQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let (token, id) = parse_peer(query.token.as_deref(), query.id.as_deref())?;
    let data = state.service.drain_messages(&token, id)?;
    Ok(Json(MessagesResponse {
        message: OK.to_string(),
        data,
    }))
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.service.stats())
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
