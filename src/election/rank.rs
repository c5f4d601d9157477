//! Rank resolution over the membership set
//!
//! The leader is whoever holds the smallest suffix; nothing is voted on or
//! stored. Members are located by suffix, never by payload, so peers that
//! advertise identical identifiers still get distinct ranks.

use crate::client::CoordinationClient;
use crate::common::{paths, CallPolicy, Error, Result};
use crate::election::node::{MembershipNode, PeerInfo};
use std::sync::Arc;

/// Position of one peer in the membership set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Zero-based; 0 is the leader
    pub rank: usize,
    pub leader: MembershipNode,
    /// Sibling at `rank - 1`, the only node a follower watches
    pub predecessor: Option<MembershipNode>,
    pub members: usize,
}

impl Resolution {
    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

/// Build the ordered membership set from raw child names.
///
/// Children without the configured prefix or a parseable suffix are not
/// members and are skipped.
pub fn membership_set(parent: &str, prefix: &str, children: &[String]) -> Vec<MembershipNode> {
    let mut members: Vec<MembershipNode> = children
        .iter()
        .filter(|name| name.starts_with(prefix))
        .filter_map(|name| {
            paths::sequence_suffix(name).map(|sequence| MembershipNode {
                path: paths::join(parent, name),
                sequence,
            })
        })
        .collect();
    members.sort_by_key(|node| node.sequence);
    members
}

/// Rank of `own` within an ordered membership set
pub fn rank_in(members: &[MembershipNode], own: &MembershipNode) -> Result<Resolution> {
    let rank = members
        .binary_search_by_key(&own.sequence, |node| node.sequence)
        .ok()
        .filter(|&idx| members[idx].path == own.path)
        .ok_or_else(|| Error::SelfNotFound(own.path.clone()))?;

    Ok(Resolution {
        rank,
        leader: members[0].clone(),
        predecessor: rank.checked_sub(1).map(|idx| members[idx].clone()),
        members: members.len(),
    })
}

pub struct RankResolver {
    client: Arc<dyn CoordinationClient>,
    prefix: String,
    policy: CallPolicy,
}

impl RankResolver {
    pub fn new(client: Arc<dyn CoordinationClient>, prefix: &str, policy: CallPolicy) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            policy,
        }
    }

    /// Current membership set, ascending by suffix
    pub async fn members(&self, parent: &str) -> Result<Vec<MembershipNode>> {
        let children = self
            .policy
            .run("get_children", || self.client.get_children(parent))
            .await
            .map_err(|e| match e {
                Error::NoNode(_) => Error::InvalidParent(parent.to_string()),
                e => e,
            })?;
        Ok(membership_set(parent, &self.prefix, &children))
    }

    /// Rank and predecessor of `own`.
    ///
    /// `SelfNotFound` means the node expired after it was created; the caller
    /// must register again.
    pub async fn resolve(&self, parent: &str, own: &MembershipNode) -> Result<Resolution> {
        let members = self.members(parent).await?;
        let resolution = rank_in(&members, own)?;
        tracing::debug!(
            "Resolved {} to rank {} of {}",
            own,
            resolution.rank,
            resolution.members
        );
        Ok(resolution)
    }

    /// Current leader and its payload, if anyone is registered
    pub async fn leader(&self, parent: &str) -> Result<Option<(MembershipNode, PeerInfo)>> {
        for node in self.members(parent).await? {
            match self
                .policy
                .run("get_data", || self.client.get_data(&node.path, false))
                .await
            {
                Ok(bytes) => return Ok(Some((node, PeerInfo::decode(&bytes)?))),
                // Deleted between listing and reading; the next one leads now
                Err(Error::NoNode(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
