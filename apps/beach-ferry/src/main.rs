use std::sync::Arc;

use anyhow::{Context, Result};
use beach_ferry::{
    config::Cli,
    engine::{EngineEvent, WebRtcEngineFactory},
    ClientConfig, ConnectionOrchestrator, HttpSignalingClient,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    let cli = Cli::parse();
    let config = ClientConfig::try_from(&cli).context("invalid configuration")?;
    info!(
        signal_url = %config.signal_url,
        token = %cli.token,
        role = %cli.mode,
        "starting beach-ferry"
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            ctrl_c_cancel.cancel();
        }
    });

    let orchestrator = ConnectionOrchestrator::new(
        Arc::new(HttpSignalingClient::new(&config)),
        Arc::new(WebRtcEngineFactory::new(config.ice_servers.clone())),
        config.session.clone(),
    );

    let mut connected = match orchestrator.connect(&cli.token, cli.mode, &cancel).await {
        Ok(connected) => connected,
        Err(err) => {
            let state = err.state();
            error!(%state, error = %err, "could not establish connection");
            return Err(anyhow::Error::new(err).context(format!("handshake failed while {state}")));
        }
    };
    info!(
        peer_id = %connected.info.id,
        remote_id = %connected.peer.id,
        "connected; lines typed on stdin are sent to the peer"
    );

    if let Some(greeting) = cli.greeting.clone() {
        connected
            .send(greeting)
            .await
            .context("failed to send greeting")?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            _ = cancel.cancelled() => Input::Cancelled,
            line = lines.next_line() => Input::Line(line.context("failed to read stdin")?),
            event = connected.next_event() => Input::Event(event),
        };
        match input {
            Input::Cancelled | Input::Line(None) => break,
            Input::Line(Some(line)) => {
                connected.send(line).await.context("failed to send line")?;
            }
            Input::Event(Some(EngineEvent::ChannelMessage(data))) => {
                println!("{}", String::from_utf8_lossy(&data));
            }
            Input::Event(Some(EngineEvent::Failed(reason))) => {
                error!(%reason, "connection failed");
                break;
            }
            Input::Event(Some(EngineEvent::ChannelClosed) | None) => {
                info!("peer closed the channel");
                break;
            }
            Input::Event(Some(_)) => {}
        }
    }

    connected.close().await.context("failed to close connection")?;
    Ok(())
}

enum Input {
    Cancelled,
    Line(Option<String>),
    Event(Option<EngineEvent>),
}
