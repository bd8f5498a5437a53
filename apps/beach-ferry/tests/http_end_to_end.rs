mod support;

use std::net::SocketAddr;
use std::sync::Arc;

use beach_ferry::{
    ClientConfig, ClientError, ConnectionOrchestrator, HttpSignalingClient, SignalingApi,
};
use beach_pier::{AppState, ServiceConfig, SignalingService};
use pier_proto::{PeerId, RelayMessage, Role, SignalError};
use support::{fast_settings, token, FakeLink, Script};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Server {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Server {
    async fn start(config: ServiceConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, stop) = oneshot::channel::<()>();
        let state = AppState::new(SignalingService::new(config), None);
        let task = tokio::spawn(beach_pier::serve(listener, state, async move {
            let _ = stop.await;
        }));
        Self {
            addr,
            shutdown,
            task,
        }
    }

    fn client(&self) -> HttpSignalingClient {
        let config = ClientConfig::new(&format!("http://{}", self.addr)).unwrap();
        HttpSignalingClient::new(&config)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

#[test_timeout::tokio_timeout_test]
async fn peers_connect_through_the_http_service() {
    let server = Server::start(ServiceConfig::default()).await;
    let link = FakeLink::new()
        .with_script(Role::Initiator, Script::candidates("s", 2, 1))
        .with_script(Role::Responder, Script::candidates("r", 1, 0));
    let abc = token("abc");
    let cancel = CancellationToken::new();

    let initiator = ConnectionOrchestrator::new(
        Arc::new(server.client()),
        Arc::new(link.clone()),
        fast_settings(),
    );
    let responder = ConnectionOrchestrator::new(
        Arc::new(server.client()),
        Arc::new(link.clone()),
        fast_settings(),
    );
    let (initiator, responder) = tokio::join!(
        initiator.connect(&abc, Role::Initiator, &cancel),
        responder.connect(&abc, Role::Responder, &cancel),
    );
    let initiator = initiator.unwrap();
    let responder = responder.unwrap();

    assert_eq!(initiator.peer.id, responder.info.id);
    assert_eq!(responder.peer.id, initiator.info.id);
    assert_eq!(initiator.counters.candidates_flushed, 2);
    assert_eq!(
        link.remote_candidates(Role::Responder),
        vec!["s-early-0", "s-early-1", "s-late-0"]
    );
    assert_eq!(link.remote_candidates(Role::Initiator), vec!["r-early-0"]);

    server.stop().await;
}

#[test_timeout::tokio_timeout_test]
async fn http_client_surfaces_structured_rejections() {
    let server = Server::start(ServiceConfig {
        mailbox_capacity: 1,
        ..ServiceConfig::default()
    })
    .await;
    let client = server.client();
    let abc = token("abc");

    let first = client.register(&abc, Role::Initiator).await.unwrap();
    assert_eq!(first, PeerId::FIRST);
    let err = client.register(&abc, Role::Initiator).await.unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(SignalError::RoleTaken {
            role: Role::Initiator,
            ..
        })
    ));
    assert!(!err.is_retryable());

    let second = client.register(&abc, Role::Responder).await.unwrap();
    assert_eq!(client.list_peers(&abc, first).await.unwrap().len(), 1);

    let message = RelayMessage::candidate(abc.clone(), first, second, "c");
    client.post_message(&message).await.unwrap();
    let err = client.post_message(&message).await.unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(SignalError::MailboxFull { capacity: 1, .. })
    ));
    assert!(err.is_retryable());

    assert_eq!(client.drain_messages(&abc, second).await.unwrap(), vec![message]);
    assert!(client.drain_messages(&abc, second).await.unwrap().is_empty());

    let err = client
        .drain_messages(&abc, second.next())
        .await
        .unwrap_err();
    assert!(matches!(err.rejection(), Some(SignalError::UnknownPeer { .. })));

    server.stop().await;
}

#[test_timeout::tokio_timeout_test]
async fn unreachable_service_is_a_retryable_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(&format!("http://{addr}")).unwrap();
    let client = HttpSignalingClient::new(&config);
    let err = client
        .register(&token("abc"), Role::Initiator)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Network { .. }), "{err}");
    assert!(err.is_retryable());
}
