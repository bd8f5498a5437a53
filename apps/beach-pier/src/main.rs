use anyhow::{Context, Result};
use beach_pier::{
    config::{Cli, PierConfig},
    telemetry::Telemetry,
    AppState, SignalingService,
};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = PierConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        mailbox_capacity = config.service.mailbox_capacity,
        token_idle_secs = config.service.idle_timeout.as_secs(),
        "starting beach-pier"
    );

    let service = SignalingService::new(config.service.clone());
    let recycler_handle = service.spawn_recycler();
    let state = AppState::new(service, Some(telemetry.metrics_handle()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("beach-pier listening on {}", config.listen_addr);

    beach_pier::serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    recycler_handle.abort();
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
