use std::time::Duration;

use clap::Parser;
use pier_proto::{Role, Token};
use url::Url;

use crate::backoff::RetryPolicy;
use crate::error::ConfigError;

pub const DEFAULT_SIGNAL_URL: &str = "http://localhost:8080";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "beach-ferry",
    author,
    version,
    about = "Meet a peer through Beach Pier and open a direct data channel"
)]
pub struct Cli {
    /// Negotiation role: S creates the offer, R answers it.
    #[arg(long)]
    pub mode: Role,

    /// Shared token both peers register under.
    #[arg(long)]
    pub token: Token,

    /// Base URL of the Beach Pier signaling service.
    #[arg(long, env = "BEACH_FERRY_SIGNAL_URL", default_value = DEFAULT_SIGNAL_URL)]
    pub signal_url: String,

    /// Delay between peer-list and mailbox polls.
    #[arg(long, env = "BEACH_FERRY_POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Give up if no peer joins within this many seconds.
    #[arg(long, env = "BEACH_FERRY_DISCOVERY_TIMEOUT_SECS")]
    pub discovery_timeout_secs: Option<u64>,

    /// STUN/TURN server URL; may be repeated.
    #[arg(long = "stun", default_value = DEFAULT_STUN_SERVER)]
    pub stun: Vec<String>,

    /// Attempts per signaling call before a network failure is fatal.
    #[arg(long, env = "BEACH_FERRY_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// Text sent to the peer once the channel opens.
    #[arg(long)]
    pub greeting: Option<String>,
}

/// Timing knobs shared by discovery and the handshake.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub discovery_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            discovery_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signal_url: Url,
    pub request_timeout: Duration,
    pub drain_timeout: Duration,
    pub ice_servers: Vec<String>,
    pub session: SessionSettings,
}

impl ClientConfig {
    pub fn new(signal_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            signal_url: parse_signal_url(signal_url)?,
            request_timeout: REQUEST_TIMEOUT,
            drain_timeout: DRAIN_TIMEOUT,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            session: SessionSettings::default(),
        })
    }
}

impl TryFrom<&Cli> for ClientConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        if cli.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if cli.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        let mut config = ClientConfig::new(&cli.signal_url)?;
        config.ice_servers = cli
            .stun
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        config.session = SessionSettings {
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            discovery_timeout: cli.discovery_timeout_secs.map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: cli.max_attempts,
                ..RetryPolicy::default()
            },
        };
        Ok(config)
    }
}

fn parse_signal_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidSignalUrl {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }
    // endpoints are joined relative to the base
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["beach-ferry", "--mode", "S", "--token", "abc"]).unwrap();
        assert_eq!(cli.mode, Role::Initiator);
        let config = ClientConfig::try_from(&cli).unwrap();
        assert_eq!(config.signal_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.session.poll_interval, Duration::from_secs(2));
        assert_eq!(config.session.retry.max_attempts, 5);
        assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.drain_timeout, Duration::from_secs(60));
    }

    #[test_timeout::timeout]
    fn cli_rejects_bad_mode_and_empty_token() {
        assert!(Cli::try_parse_from(["beach-ferry", "--mode", "Q", "--token", "abc"]).is_err());
        assert!(Cli::try_parse_from(["beach-ferry", "--mode", "R", "--token", " "]).is_err());
    }

    #[test_timeout::timeout]
    fn signal_url_keeps_base_path() {
        let config = ClientConfig::new("https://example.com/pier").unwrap();
        assert_eq!(
            config.signal_url.join("register").unwrap().as_str(),
            "https://example.com/pier/register"
        );
        assert!(matches!(
            ClientConfig::new("ftp://example.com"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(ClientConfig::new("not a url").is_err());
    }
}
