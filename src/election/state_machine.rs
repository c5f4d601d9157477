//! Election state machine
//!
//! ```text
//!            register
//!   (start) ─────────► Unresolved ──rank 0──► Leader
//!                        ▲    │                  │
//!   predecessor deleted, │    │ rank k           │ session lost
//!   watch anomaly        │    ▼                  │
//!                        └─ Follower ◄───────────┘ (via Unresolved)
//! ```
//!
//! Every entry into `Unresolved` runs one resolution cycle: resolve the rank,
//! then either lead or arm a watch on the predecessor. A leader has nothing to
//! watch and only loses its role together with its session.

use crate::client::{CoordinationClient, SessionId, WatchedEvent};
use crate::common::{CallPolicy, ElectionConfig, Error, Result};
use crate::election::node::{MembershipNode, PeerInfo, Role};
use crate::election::rank::RankResolver;
use crate::election::registrar::NodeRegistrar;
use crate::election::watch::{WatchOutcome, WatchScheduler};
use std::sync::Arc;
use tokio::sync::watch;

/// Role-change callbacks.
///
/// Invoked synchronously on the peer's notification task; implementations
/// must return promptly or they stall delivery of later events.
pub trait ElectionListener: Send + Sync {
    fn on_become_leader(&self) {}

    fn on_become_follower(&self, _predecessor: &MembershipNode) {}

    fn on_unresolved(&self) {}

    /// A fault that survived the retry policy
    fn on_error(&self, _error: &Error) {}
}

/// Listener that ignores everything
pub struct NoopListener;

impl ElectionListener for NoopListener {}

/// Snapshot published after every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub role: Role,
    pub node: Option<MembershipNode>,
    /// Predecessor being watched (followers only)
    pub watching: Option<MembershipNode>,
    pub session: SessionId,
    /// Completed session recoveries
    pub recoveries: u64,
}

pub struct ElectionStateMachine {
    peer_id: String,
    root: String,
    payload: Vec<u8>,
    client: Arc<dyn CoordinationClient>,
    registrar: NodeRegistrar,
    resolver: RankResolver,
    scheduler: WatchScheduler,
    listener: Arc<dyn ElectionListener>,
    role: Role,
    own: Option<MembershipNode>,
    watching: Option<MembershipNode>,
    recoveries: u64,
    status: watch::Sender<PeerStatus>,
}

impl ElectionStateMachine {
    pub fn new(
        config: &ElectionConfig,
        client: Arc<dyn CoordinationClient>,
        info: &PeerInfo,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Self> {
        let policy = CallPolicy::from_config(config);
        let (status, _) = watch::channel(PeerStatus {
            role: Role::Unresolved,
            node: None,
            watching: None,
            session: client.session_id(),
            recoveries: 0,
        });

        Ok(Self {
            peer_id: info.peer_id.clone(),
            root: config.root.clone(),
            payload: info.encode()?,
            registrar: NodeRegistrar::new(client.clone(), &config.node_prefix, policy),
            resolver: RankResolver::new(client.clone(), &config.node_prefix, policy),
            scheduler: WatchScheduler::new(client.clone(), policy),
            client,
            listener,
            role: Role::Unresolved,
            own: None,
            watching: None,
            recoveries: 0,
            status,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerStatus> {
        self.status.subscribe()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn own_node(&self) -> Option<&MembershipNode> {
        self.own.as_ref()
    }

    pub fn watching(&self) -> Option<&MembershipNode> {
        self.watching.as_ref()
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    pub fn listener(&self) -> &Arc<dyn ElectionListener> {
        &self.listener
    }

    /// Register if needed, then run a resolution cycle
    pub async fn start(&mut self) -> Result<()> {
        if self.role == Role::Closed {
            return Err(Error::Closed);
        }
        if self.own.is_none() {
            self.register().await?;
        }
        self.elect().await
    }

    async fn register(&mut self) -> Result<()> {
        let node = self.registrar.register(&self.root, &self.payload).await?;
        self.own = Some(node);
        self.publish();
        Ok(())
    }

    /// One resolution cycle, entered through `Unresolved`.
    ///
    /// Stale references are not errors here: an expired own node is
    /// registered again and a vanished predecessor triggers another round.
    pub async fn elect(&mut self) -> Result<()> {
        loop {
            self.enter_unresolved();

            let Some(own) = self.own.clone() else {
                self.register().await?;
                continue;
            };

            let resolution = match self.resolver.resolve(&self.root, &own).await {
                Ok(resolution) => resolution,
                Err(Error::SelfNotFound(path)) => {
                    tracing::warn!("Membership node {} expired, registering again", path);
                    self.own = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(predecessor) = resolution.predecessor else {
                self.become_leader();
                return Ok(());
            };

            match self.scheduler.watch_predecessor(&predecessor.path).await {
                Ok(()) => {
                    self.become_follower(predecessor);
                    return Ok(());
                }
                Err(Error::WatchExpired(path)) => {
                    tracing::debug!("Predecessor {} vanished before the watch, re-resolving", path);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Handle a fired watch
    pub async fn handle_watch(&mut self, session: SessionId, event: &WatchedEvent) -> Result<()> {
        if session != self.client.session_id() {
            tracing::debug!(
                "Ignoring {:?} on {} from old session {}",
                event.kind,
                event.path,
                session
            );
            return Ok(());
        }
        if self.role != Role::Follower {
            tracing::debug!("Ignoring {:?} on {} while {}", event.kind, event.path, self.role);
            return Ok(());
        }

        match self.scheduler.on_event(session, event).await {
            Ok(WatchOutcome::Deleted(deletion)) => {
                tracing::info!("Predecessor {} is gone, re-resolving", deletion.path);
                self.watching = None;
                self.elect().await
            }
            Ok(WatchOutcome::Rearmed) | Ok(WatchOutcome::Ignored) => Ok(()),
            Err(e) => {
                tracing::warn!("Lost the watch on {}: {}", event.path, e);
                self.watching = None;
                self.enter_unresolved();
                Err(e)
            }
        }
    }

    /// The session died and took the membership node and watches with it
    pub fn on_session_lost(&mut self) {
        self.scheduler.invalidate();
        self.watching = None;
        if let Some(node) = self.own.take() {
            tracing::warn!("Session lost, membership node {} is gone", node);
        }
        self.enter_unresolved();
    }

    pub(crate) fn record_recovery(&mut self) {
        self.recoveries += 1;
        self.publish();
    }

    /// Tear down the watch and the membership node, then the session.
    ///
    /// Deleting the node explicitly hands leadership over right away instead
    /// of after a session timeout. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        if self.role == Role::Closed {
            return Ok(());
        }

        self.scheduler.cancel().await;
        self.watching = None;

        let mut result = Ok(());
        if let Some(node) = self.own.take() {
            if let Err(e) = self.registrar.deregister(&node).await {
                tracing::warn!("Failed to delete membership node {}: {}", node, e);
                result = Err(e);
            }
        }
        if let Err(e) = self.client.close().await {
            tracing::warn!("Failed to close session {}: {}", self.client.session_id(), e);
        }

        self.set_role(Role::Closed);
        result
    }

    fn become_leader(&mut self) {
        self.watching = None;
        self.set_role(Role::Leader);
        tracing::info!(
            "Peer {} is the leader ({})",
            self.peer_id,
            self.own.as_ref().map_or("-", |n| n.path.as_str())
        );
        self.listener.on_become_leader();
    }

    fn become_follower(&mut self, predecessor: MembershipNode) {
        tracing::info!("Peer {} follows {}", self.peer_id, predecessor);
        self.watching = Some(predecessor.clone());
        self.set_role(Role::Follower);
        self.listener.on_become_follower(&predecessor);
    }

    fn enter_unresolved(&mut self) {
        if matches!(self.role, Role::Unresolved | Role::Closed) {
            return;
        }
        self.set_role(Role::Unresolved);
        self.listener.on_unresolved();
    }

    fn set_role(&mut self, role: Role) {
        if self.role != role {
            tracing::debug!("Peer {}: {} -> {}", self.peer_id, self.role, role);
        }
        self.role = role;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(PeerStatus {
            role: self.role,
            node: self.own.clone(),
            watching: self.watching.clone(),
            session: self.client.session_id(),
            recoveries: self.recoveries,
        });
    }
}
