use std::time::Duration;

use async_trait::async_trait;
use pier_proto::{
    ErrorBody, MessagesResponse, PeerId, PeerIdentity, PeersResponse, RegisterResponse,
    RelayMessage, Role, Token,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// The four rendezvous calls a client makes.
#[async_trait]
pub trait SignalingApi: Send + Sync {
    async fn register(&self, token: &Token, role: Role) -> Result<PeerId, ClientError>;

    async fn list_peers(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<PeerIdentity>, ClientError>;

    async fn post_message(&self, message: &RelayMessage) -> Result<(), ClientError>;

    async fn drain_messages(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<RelayMessage>, ClientError>;
}

/// [`SignalingApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpSignalingClient {
    client: Client,
    base: Url,
    request_timeout: Duration,
    drain_timeout: Duration,
}

impl HttpSignalingClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base: config.signal_url.clone(),
            request_timeout: config.request_timeout,
            drain_timeout: config.drain_timeout,
        }
    }

    fn endpoint(&self, operation: &'static str, path: &str) -> Result<Url, ClientError> {
        self.base.join(path).map_err(|err| ClientError::Network {
            operation,
            reason: format!("invalid endpoint {path}: {err}"),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        deadline: Duration,
    ) -> Result<T, ClientError> {
        tracing::trace!(operation, await = "client.send", state = "start");
        let send_attempt = request.timeout(deadline).send().await;
        tracing::trace!(
            operation,
            await = "client.send",
            state = "end",
            result = ?send_attempt.as_ref().map(reqwest::Response::status)
        );
        let response = send_attempt.map_err(|err| http_error(operation, deadline, err))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|err| {
                if err.is_timeout() {
                    http_error(operation, deadline, err)
                } else {
                    ClientError::Decode {
                        operation,
                        reason: err.to_string(),
                    }
                }
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| http_error(operation, deadline, err))?;
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(ClientError::Rejected {
                operation,
                source: error.reason,
            }),
            Err(_) => Err(ClientError::Status {
                operation,
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl SignalingApi for HttpSignalingClient {
    async fn register(&self, token: &Token, role: Role) -> Result<PeerId, ClientError> {
        let url = self.endpoint("register", "register")?;
        let request = self
            .client
            .post(url)
            .query(&[("token", token.as_str()), ("mode", role.code())]);
        let response: RegisterResponse = self
            .execute("register", request, self.request_timeout)
            .await?;
        Ok(response.peer_id)
    }

    async fn list_peers(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<PeerIdentity>, ClientError> {
        let url = self.endpoint("list_peers", "peers")?;
        let request = self
            .client
            .get(url)
            .query(&[("token", token.to_string()), ("id", id.to_string())]);
        let response: PeersResponse = self
            .execute("list_peers", request, self.request_timeout)
            .await?;
        Ok(response.peers)
    }

    async fn post_message(&self, message: &RelayMessage) -> Result<(), ClientError> {
        let url = self.endpoint("post_message", "message")?;
        let request = self.client.post(url).json(message);
        let _: serde_json::Value = self
            .execute("post_message", request, self.request_timeout)
            .await?;
        Ok(())
    }

    async fn drain_messages(
        &self,
        token: &Token,
        id: PeerId,
    ) -> Result<Vec<RelayMessage>, ClientError> {
        let url = self.endpoint("drain_messages", "messages")?;
        let request = self
            .client
            .get(url)
            .query(&[("token", token.to_string()), ("id", id.to_string())]);
        let response: MessagesResponse = self
            .execute("drain_messages", request, self.drain_timeout)
            .await?;
        Ok(response.data)
    }
}

fn http_error(operation: &'static str, deadline: Duration, err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout {
            operation,
            after: deadline,
        }
    } else {
        ClientError::Network {
            operation,
            reason: err.to_string(),
        }
    }
}
