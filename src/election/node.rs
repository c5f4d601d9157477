//! Membership node, payload and role types

use crate::common::{paths, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One peer's ephemeral-sequential node under the election root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipNode {
    /// Full path as assigned by the service
    pub path: String,
    /// Numeric suffix; unique and increasing among siblings
    pub sequence: u64,
}

impl MembershipNode {
    pub fn from_path(path: &str) -> Result<Self> {
        let sequence = paths::sequence_suffix(paths::name(path)).ok_or_else(|| {
            Error::Internal(format!("node {} has no sequence suffix", path))
        })?;
        Ok(Self {
            path: path.to_string(),
            sequence,
        })
    }

    pub fn name(&self) -> &str {
        paths::name(&self.path)
    }
}

impl std::fmt::Display for MembershipNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Payload stored in each membership node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl PeerInfo {
    pub fn new(peer_id: impl Into<String>, advertise_addr: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            advertise_addr,
            registered_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Election role of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unresolved,
    Follower,
    Leader,
    Closed,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unresolved => write!(f, "unresolved"),
            Role::Follower => write!(f, "follower"),
            Role::Leader => write!(f, "leader"),
            Role::Closed => write!(f, "closed"),
        }
    }
}
