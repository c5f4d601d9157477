//! Coordination service boundary
//!
//! The election core only talks to the service through [`CoordinationClient`].
//! Watch firings and session-state changes arrive on one ordered
//! [`NotificationStream`] per client, tagged with the session that produced
//! them so that late notifications from a dead session can be told apart.

pub mod memory;

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{MemoryClient, MemoryCoordinator};

/// Session identifier assigned by the service
pub type SessionId = u64;

/// Ordered notifications for one client
pub type NotificationStream = mpsc::UnboundedReceiver<Notification>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Connected,
    Suspended,
    Lost,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Suspended => write!(f, "suspended"),
            SessionState::Lost => write!(f, "lost"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
}

/// A fired one-shot watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Watch {
        session: SessionId,
        event: WatchedEvent,
    },
    Session {
        session: SessionId,
        state: SessionState,
    },
}

/// Session-based handle to the coordination service.
///
/// Watches registered through `exists` or `get_data` fire at most once and
/// are delivered on the client's notification stream.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Current session
    fn session_id(&self) -> SessionId;

    /// Create a node; returns the actual path (with suffix if sequential)
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Child names (not full paths)
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>>;

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether the node exists; with `watch`, arm a one-shot watch either way
    async fn exists(&self, path: &str, watch: bool) -> Result<bool>;

    /// Drop this session's watches on `path`
    async fn remove_watches(&self, path: &str) -> Result<()>;

    /// Establish a fresh session after the previous one was lost
    async fn reconnect(&self) -> Result<SessionId>;

    /// Close the session; the service deletes its ephemeral nodes
    async fn close(&self) -> Result<()>;
}
