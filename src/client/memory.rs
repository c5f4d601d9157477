//! In-process coordination service
//!
//! A node tree with ZooKeeper semantics: ephemeral nodes owned by sessions,
//! per-parent sequence counters, one-shot watches and session expiry. Used by
//! the simulator and the test suite, and handy for embedding several peers in
//! one process. Fault injection hooks (`set_available`, `expire_session`,
//! `suspend_session`) stand in for network partitions and server restarts.

use crate::client::{
    CoordinationClient, CreateMode, EventKind, Notification, NotificationStream, SessionId,
    SessionState, WatchedEvent,
};
use crate::common::{paths, Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

struct ZNode {
    data: Vec<u8>,
    owner: Option<SessionId>,
    next_sequence: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, owner: Option<SessionId>) -> Self {
        Self {
            data,
            owner,
            next_sequence: 1,
        }
    }
}

struct Session {
    notifier: mpsc::UnboundedSender<Notification>,
    state: SessionState,
    /// Bumped on every suspension so stale expiry timers can be detected
    epoch: u64,
}

struct Tree {
    nodes: BTreeMap<String, ZNode>,
    sessions: HashMap<SessionId, Session>,
    watches: HashMap<String, HashSet<SessionId>>,
    next_session: SessionId,
    available: bool,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), None));
        Self {
            nodes,
            sessions: HashMap::new(),
            watches: HashMap::new(),
            next_session: 0,
            available: true,
        }
    }

    fn check(&self, session: SessionId) -> Result<()> {
        if !self.available {
            return Err(Error::CoordinationUnavailable(
                "coordination service unreachable".into(),
            ));
        }
        match self.sessions.get(&session) {
            None => Err(Error::SessionLost(format!("session {} expired", session))),
            Some(s) if s.state == SessionState::Suspended => Err(Error::CoordinationUnavailable(
                format!("session {} suspended", session),
            )),
            Some(_) => Ok(()),
        }
    }

    fn open_session(&mut self, notifier: mpsc::UnboundedSender<Notification>) -> SessionId {
        self.next_session += 1;
        let session = self.next_session;
        let _ = notifier.send(Notification::Session {
            session,
            state: SessionState::Connected,
        });
        self.sessions.insert(
            session,
            Session {
                notifier,
                state: SessionState::Connected,
                epoch: 0,
            },
        );
        session
    }

    /// End a session: drop its watches and delete the nodes it owns
    fn drop_session(&mut self, session: SessionId, notify_lost: bool) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };

        for watchers in self.watches.values_mut() {
            watchers.remove(&session);
        }
        self.watches.retain(|_, watchers| !watchers.is_empty());

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.nodes.remove(&path);
            self.fire(&path, EventKind::NodeDeleted);
        }

        if notify_lost {
            let _ = entry.notifier.send(Notification::Session {
                session,
                state: SessionState::Lost,
            });
        }
    }

    fn set_session_state(&mut self, session: SessionId, state: SessionState) -> Option<u64> {
        let entry = self.sessions.get_mut(&session)?;
        if entry.state == state {
            return None;
        }
        entry.state = state;
        if state == SessionState::Suspended {
            entry.epoch += 1;
        }
        let _ = entry.notifier.send(Notification::Session { session, state });
        Some(entry.epoch)
    }

    fn still_suspended(&self, session: SessionId, epoch: u64) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|s| s.state == SessionState::Suspended && s.epoch == epoch)
    }

    /// Consume every watch on `path`
    fn fire(&mut self, path: &str, kind: EventKind) {
        let Some(watchers) = self.watches.remove(path) else {
            return;
        };
        for session in watchers {
            if let Some(entry) = self.sessions.get(&session) {
                let _ = entry.notifier.send(Notification::Watch {
                    session,
                    event: WatchedEvent {
                        kind,
                        path: path.to_string(),
                    },
                });
            }
        }
    }

    fn watch(&mut self, session: SessionId, path: &str) {
        self.watches
            .entry(path.to_string())
            .or_default()
            .insert(session);
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|candidate| paths::parent(candidate) == Some(path))
            .map(|candidate| paths::name(candidate).to_string())
            .collect()
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        self.check(session)?;
        paths::validate_path(path)?;
        let parent = paths::parent(path).ok_or_else(|| Error::NodeExists(path.to_string()))?;

        let parent_node = self
            .nodes
            .get(parent)
            .ok_or_else(|| Error::NoNode(parent.to_string()))?;
        if parent_node.owner.is_some() {
            return Err(Error::Other(format!(
                "ephemeral node {} cannot have children",
                parent
            )));
        }

        let actual = if mode.is_sequential() {
            paths::with_sequence(path, parent_node.next_sequence)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(Error::NodeExists(actual));
        }

        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.next_sequence += 1;
        }
        let owner = mode.is_ephemeral().then_some(session);
        self.nodes
            .insert(actual.clone(), ZNode::new(data.to_vec(), owner));
        self.fire(&actual, EventKind::NodeCreated);

        Ok(actual)
    }

    fn delete(&mut self, session: SessionId, path: &str) -> Result<()> {
        self.check(session)?;
        if path == "/" {
            return Err(Error::Other("cannot delete the root node".into()));
        }
        if !self.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !self.child_names(path).is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        self.fire(path, EventKind::NodeDeleted);
        Ok(())
    }

    fn set_data(&mut self, session: SessionId, path: &str, data: &[u8]) -> Result<()> {
        self.check(session)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        self.fire(path, EventKind::NodeDataChanged);
        Ok(())
    }
}

/// Shared in-process coordination service
#[derive(Clone)]
pub struct MemoryCoordinator {
    inner: Arc<Mutex<Tree>>,
    session_timeout: Duration,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::with_session_timeout(Duration::from_millis(7000))
    }

    /// A suspended session is expired once it stays suspended this long
    pub fn with_session_timeout(session_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Tree::new())),
            session_timeout,
        }
    }

    /// Open a new session
    pub async fn connect(&self) -> (MemoryClient, NotificationStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.inner.lock().await.open_session(tx.clone());
        tracing::debug!("Opened session {}", session);
        let client = MemoryClient {
            service: self.clone(),
            session: AtomicU64::new(session),
            notifier: tx,
        };
        (client, rx)
    }

    /// Create durable nodes along `path`
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        paths::validate_path(path)?;
        let mut tree = self.inner.lock().await;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if let Some(node) = tree.nodes.get(&current) {
                if node.owner.is_some() {
                    return Err(Error::Other(format!("{} is ephemeral", current)));
                }
                continue;
            }
            tree.nodes
                .insert(current.clone(), ZNode::new(Vec::new(), None));
        }
        Ok(())
    }

    /// Simulate the service becoming (un)reachable for every client
    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.available = available;
    }

    /// Expire a session as the service would after a heartbeat timeout
    pub async fn expire_session(&self, session: SessionId) {
        tracing::debug!("Expiring session {}", session);
        self.inner.lock().await.drop_session(session, true);
    }

    /// Disconnect a session without expiring it (yet)
    pub async fn suspend_session(&self, session: SessionId) {
        let Some(epoch) = self
            .inner
            .lock()
            .await
            .set_session_state(session, SessionState::Suspended)
        else {
            return;
        };

        let inner = self.inner.clone();
        let timeout = self.session_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut tree = inner.lock().await;
            if tree.still_suspended(session, epoch) {
                tracing::debug!("Session {} suspended past {:?}, expiring", session, timeout);
                tree.drop_session(session, true);
            }
        });
    }

    /// Reconnect a suspended session within its timeout
    pub async fn resume_session(&self, session: SessionId) {
        self.inner
            .lock()
            .await
            .set_session_state(session, SessionState::Connected);
    }

    pub async fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&session)
            .map(|s| s.state)
    }

    /// Sorted child names, bypassing sessions (for inspection)
    pub async fn children(&self, path: &str) -> Vec<String> {
        let mut names = self.inner.lock().await.child_names(path);
        names.sort();
        names
    }

    pub async fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .nodes
            .get(path)
            .map(|node| node.data.clone())
    }

    pub async fn node_exists(&self, path: &str) -> bool {
        self.inner.lock().await.nodes.contains_key(path)
    }
}

/// Client bound to one session of a [`MemoryCoordinator`] at a time
pub struct MemoryClient {
    service: MemoryCoordinator,
    session: AtomicU64,
    notifier: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let mut tree = self.service.inner.lock().await;
        tree.create(self.session_id(), path, data, mode)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.service.inner.lock().await;
        tree.check(self.session_id())?;
        if !tree.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(tree.child_names(path))
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>> {
        let mut tree = self.service.inner.lock().await;
        let session = self.session_id();
        tree.check(session)?;
        let data = tree
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        if watch {
            tree.watch(session, path);
        }
        Ok(data)
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.service.inner.lock().await;
        tree.set_data(self.session_id(), path, data)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.service.inner.lock().await;
        tree.delete(self.session_id(), path)
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<bool> {
        let mut tree = self.service.inner.lock().await;
        let session = self.session_id();
        tree.check(session)?;
        if watch {
            tree.watch(session, path);
        }
        Ok(tree.nodes.contains_key(path))
    }

    async fn remove_watches(&self, path: &str) -> Result<()> {
        let mut tree = self.service.inner.lock().await;
        let session = self.session_id();
        tree.check(session)?;
        if let Some(watchers) = tree.watches.get_mut(path) {
            watchers.remove(&session);
            if watchers.is_empty() {
                tree.watches.remove(path);
            }
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<SessionId> {
        let mut tree = self.service.inner.lock().await;
        if !tree.available {
            return Err(Error::CoordinationUnavailable(
                "coordination service unreachable".into(),
            ));
        }
        tree.drop_session(self.session_id(), false);
        let session = tree.open_session(self.notifier.clone());
        self.session.store(session, Ordering::SeqCst);
        tracing::debug!("Reconnected with session {}", session);
        Ok(session)
    }

    async fn close(&self) -> Result<()> {
        let mut tree = self.service.inner.lock().await;
        tree.drop_session(self.session_id(), false);
        Ok(())
    }
}
