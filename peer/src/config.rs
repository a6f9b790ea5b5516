//! Configuration management for the peer.

use repsync_engine::DeviceRole;
use std::{env, path::PathBuf, time::Duration};

/// Peer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Which side of the pair this process plays
    pub role: DeviceRole,
    /// Base URL of the other device. Absent means unpaired.
    pub peer_url: Option<String>,
    /// Directory holding the store snapshot, queues and outbox
    pub data_dir: PathBuf,
    /// Delay before a failed flush or apply is retried
    pub retry_delay: Duration,
    /// How often the peer's reachability is probed
    pub probe_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration through `var`, which maps a variable name to its
    /// value.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let role = var("ROLE").ok_or(ConfigError::MissingRole)?;
        let role = role
            .parse()
            .map_err(|_| ConfigError::InvalidRole(role.clone()))?;

        let peer_url = var("PEER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let retry_delay = seconds_var(&var, "RETRY_DELAY_SECS", 5)?;
        let probe_interval = seconds_var(&var, "PROBE_INTERVAL_SECS", 2)?;

        Ok(Self {
            host,
            port,
            role,
            peer_url,
            data_dir,
            retry_delay,
            probe_interval,
        })
    }

    /// Configuration for tests and embedding: listens on localhost with
    /// short timings.
    pub fn local(role: DeviceRole, data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            role,
            peer_url: None,
            data_dir,
            retry_delay: Duration::from_millis(200),
            probe_interval: Duration::from_millis(50),
        }
    }
}

fn seconds_var<F>(var: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber(name)),
        None => Ok(Duration::from_secs(default)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ROLE environment variable is required (phone or watch)")]
    MissingRole,

    #[error("Invalid ROLE value: {0}")]
    InvalidRole(String),

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),
}
