use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;

use crate::service::ServiceConfig;

#[derive(Debug, Parser)]
#[command(
    name = "beach-pier",
    author,
    version,
    about = "Beach rendezvous server pairing peers under shared tokens"
)]
pub struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "BEACH_PIER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Messages a single peer's mailbox may hold before posts are rejected.
    #[arg(long, env = "BEACH_PIER_MAILBOX_CAPACITY", default_value_t = 10)]
    pub mailbox_capacity: usize,

    /// Tokens without activity for this long are forgotten.
    #[arg(long, env = "BEACH_PIER_TOKEN_IDLE_SECS", default_value_t = 600)]
    pub token_idle_secs: u64,

    /// How often the idle-token recycler runs.
    #[arg(long, env = "BEACH_PIER_RECYCLE_INTERVAL_SECS", default_value_t = 30)]
    pub recycle_interval_secs: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_PIER_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PierConfig {
    pub listen_addr: SocketAddr,
    pub service: ServiceConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for PierConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        ensure!(cli.mailbox_capacity >= 1, "mailbox capacity must be at least 1");
        ensure!(
            cli.recycle_interval_secs >= 1,
            "recycle interval must be at least one second"
        );
        Ok(PierConfig {
            listen_addr,
            service: ServiceConfig {
                mailbox_capacity: cli.mailbox_capacity,
                idle_timeout: Duration::from_secs(cli.token_idle_secs),
                recycle_interval: Duration::from_secs(cli.recycle_interval_secs),
            },
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}
