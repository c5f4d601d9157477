//! Error types for minielect

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Coordination Service Errors ===
    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Node not found: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    // === Election Errors ===
    #[error("Own membership node not found: {0}")]
    SelfNotFound(String),

    #[error("Watch expired: {0} is already gone")]
    WatchExpired(String),

    #[error("Invalid election parent: {0}")]
    InvalidParent(String),

    #[error("Peer is closed")]
    Closed,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient failure that the retry policy should absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CoordinationUnavailable(_) | Error::Timeout(_))
    }

    /// Stale local reference: re-resolve instead of failing.
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::SelfNotFound(_) | Error::WatchExpired(_))
    }

    /// Misconfiguration; never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidParent(_) | Error::InvalidConfig(_) | Error::Config(_)
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
