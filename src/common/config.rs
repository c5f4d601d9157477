//! Configuration for minielect peers

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix, e.g. `MINIELECT__ELECTION__ROOT=/services/api`
pub const ENV_PREFIX: &str = "MINIELECT";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Peer ID (unique identifier, written into the membership payload)
    pub peer_id: String,

    /// Address other components can reach this peer on once it leads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,

    /// Coordination service connection settings
    pub coordination: CoordinationConfig,

    /// Election settings
    pub election: ElectionConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: uuid::Uuid::new_v4().to_string(),
            advertise_addr: None,
            coordination: CoordinationConfig::default(),
            election: ElectionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordination service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Service addresses (host:port)
    pub servers: Vec<String>,

    /// Session timeout; ephemeral nodes die this long after the last heartbeat
    pub session_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:2181".to_string()],
            session_timeout_ms: 7000,
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Comma-separated connect string
    pub fn connect_string(&self) -> String {
        self.servers.join(",")
    }
}

/// Election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Durable parent node holding the membership nodes
    pub root: String,

    /// Name prefix of membership nodes
    pub node_prefix: String,

    /// Deadline for a single remote call
    pub operation_timeout_ms: u64,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            root: "/election".to_string(),
            node_prefix: "member-".to_string(),
            operation_timeout_ms: 5000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ElectionConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Retry with doubling backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the second attempt
    pub backoff_ms: u64,

    /// Upper bound for the doubled delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 1000,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.backoff_ms))
    }
}

impl Config {
    /// Load config from an optional TOML file, then `MINIELECT__*` env vars.
    ///
    /// Without an explicit path, `./minielect.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("minielect").required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("coordination.servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_id.trim().is_empty() {
            return Err(Error::InvalidConfig("peer_id cannot be empty".into()));
        }

        crate::common::paths::validate_path(&self.election.root)
            .map_err(|e| Error::InvalidConfig(format!("election.root: {}", e)))?;
        if self.election.root == "/" {
            return Err(Error::InvalidConfig(
                "election.root cannot be the tree root".into(),
            ));
        }

        let prefix = &self.election.node_prefix;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "election.node_prefix must be a non-empty node name: {:?}",
                prefix
            )));
        }

        if self.coordination.servers.is_empty() {
            return Err(Error::InvalidConfig(
                "coordination.servers cannot be empty".into(),
            ));
        }
        if self.coordination.session_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "coordination.session_timeout_ms must be positive".into(),
            ));
        }
        if self.election.operation_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "election.operation_timeout_ms must be positive".into(),
            ));
        }
        if self.election.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "election.retry.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
