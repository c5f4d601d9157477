//! Membership registration
//!
//! Every call creates a brand-new ephemeral-sequential node; a node from a
//! previous session is never reused. Node names embed a per-registration
//! guid so that a create whose response was lost can be found and adopted on
//! the next attempt instead of leaving an orphan that holds a rank. The guid
//! of a failed registration is kept for the next `register` on the same
//! session, so adoption also works once the retry budget ran out.

use crate::client::{CoordinationClient, CreateMode, SessionId};
use crate::common::{paths, with_timeout, CallPolicy, Error, Result};
use crate::election::node::MembershipNode;
use std::sync::Arc;

/// Registration that did not report success; its node may exist anyway
#[derive(Debug, Clone)]
struct Pending {
    guid: String,
    session: SessionId,
}

pub struct NodeRegistrar {
    client: Arc<dyn CoordinationClient>,
    prefix: String,
    policy: CallPolicy,
    pending: Option<Pending>,
}

impl NodeRegistrar {
    pub fn new(client: Arc<dyn CoordinationClient>, prefix: &str, policy: CallPolicy) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            policy,
            pending: None,
        }
    }

    /// Create this peer's membership node under `parent`
    pub async fn register(&mut self, parent: &str, payload: &[u8]) -> Result<MembershipNode> {
        let session = self.client.session_id();
        // Nodes of a failed attempt die with their session
        let (guid, mut attempted) = match self.pending.take() {
            Some(pending) if pending.session == session => (pending.guid, true),
            _ => (uuid::Uuid::new_v4().simple().to_string(), false),
        };
        self.pending = Some(Pending {
            guid: guid.clone(),
            session,
        });
        let base = paths::join(parent, &format!("{}{}-", self.prefix, guid));

        let created = self
            .policy
            .run("register", || {
                let retrying = attempted;
                attempted = true;
                self.create_once(parent, &base, &guid, payload, retrying)
            })
            .await
            .map_err(|e| match e {
                Error::NoNode(_) => Error::InvalidParent(parent.to_string()),
                e => e,
            })?;

        self.pending = None;
        let node = MembershipNode::from_path(&created)?;
        tracing::info!("Registered membership node {}", node);
        Ok(node)
    }

    async fn create_once(
        &self,
        parent: &str,
        base: &str,
        guid: &str,
        payload: &[u8],
        retrying: bool,
    ) -> Result<String> {
        if retrying {
            let children = self.client.get_children(parent).await?;
            if let Some(name) = children.iter().find(|name| name.contains(guid)) {
                tracing::warn!("Adopting membership node {} from an earlier attempt", name);
                return Ok(paths::join(parent, name));
            }
        }
        self.client
            .create(base, payload, CreateMode::EphemeralSequential)
            .await
    }

    /// Delete a membership node; a node that is already gone counts as done.
    ///
    /// Single attempt under the call deadline: this runs on shutdown, where
    /// session close removes the node anyway if the delete does not land.
    pub async fn deregister(&self, node: &MembershipNode) -> Result<()> {
        match with_timeout(self.policy.timeout, "deregister", self.client.delete(&node.path)).await {
            Ok(()) | Err(Error::NoNode(_)) => {
                tracing::info!("Deregistered membership node {}", node);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, MemoryCoordinator, SessionId};
    use crate::common::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Creates the node but reports the first create as failed, like a
    /// connection dropped before the response arrived
    struct LostResponseClient {
        inner: MemoryClient,
        dropped: AtomicBool,
    }

    #[async_trait]
    impl CoordinationClient for LostResponseClient {
        fn session_id(&self) -> SessionId {
            self.inner.session_id()
        }

        async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
            let created = self.inner.create(path, data, mode).await?;
            if !self.dropped.swap(true, Ordering::SeqCst) {
                return Err(Error::CoordinationUnavailable("connection reset".into()));
            }
            Ok(created)
        }

        async fn get_children(&self, path: &str) -> Result<Vec<String>> {
            self.inner.get_children(path).await
        }

        async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>> {
            self.inner.get_data(path, watch).await
        }

        async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
            self.inner.set_data(path, data).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn exists(&self, path: &str, watch: bool) -> Result<bool> {
            self.inner.exists(path, watch).await
        }

        async fn remove_watches(&self, path: &str) -> Result<()> {
            self.inner.remove_watches(path).await
        }

        async fn reconnect(&self) -> Result<SessionId> {
            self.inner.reconnect().await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    fn guid(name: &str) -> &str {
        name.trim_start_matches("member-")
            .split('-')
            .next()
            .unwrap_or_default()
    }

    fn policy() -> CallPolicy {
        CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 3,
                backoff_ms: 1,
                max_backoff_ms: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_register_creates_fresh_nodes() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (client, _rx) = service.connect().await;
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", policy());

        let first = registrar.register("/election", b"a").await.unwrap();
        let second = registrar.register("/election", b"a").await.unwrap();

        assert_ne!(first.path, second.path);
        assert!(second.sequence > first.sequence);
        assert!(first.name().starts_with("member-"));
        assert_eq!(service.data(&first.path).await.unwrap(), b"a".to_vec());
    }

    #[tokio::test]
    async fn test_register_missing_parent_is_invalid() {
        let service = MemoryCoordinator::new();
        let (client, _rx) = service.connect().await;
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", policy());

        let result = registrar.register("/nowhere", b"a").await;
        assert!(matches!(result, Err(Error::InvalidParent(p)) if p == "/nowhere"));
    }

    #[tokio::test]
    async fn test_register_unavailable_after_retries() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (client, _rx) = service.connect().await;
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", policy());

        service.set_available(false).await;
        let result = registrar.register("/election", b"a").await;
        assert!(matches!(result, Err(Error::CoordinationUnavailable(_))));
        assert!(service.children("/election").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_adopts_node_from_lost_response() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (inner, _rx) = service.connect().await;
        let client = LostResponseClient {
            inner,
            dropped: AtomicBool::new(false),
        };
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", policy());

        let node = registrar.register("/election", b"a").await.unwrap();

        let children = service.children("/election").await;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], node.name());
    }

    #[tokio::test]
    async fn test_register_adopts_node_after_retries_exhausted() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (inner, _rx) = service.connect().await;
        let client = LostResponseClient {
            inner,
            dropped: AtomicBool::new(false),
        };
        let single_attempt = CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 1,
                backoff_ms: 1,
                max_backoff_ms: 1,
            },
        );
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", single_attempt);

        let failed = registrar.register("/election", b"a").await;
        assert!(matches!(failed, Err(Error::CoordinationUnavailable(_))));
        let orphan = service.children("/election").await;
        assert_eq!(orphan.len(), 1);

        let node = registrar.register("/election", b"a").await.unwrap();
        assert_eq!(node.name(), orphan[0]);
        assert_eq!(service.children("/election").await, orphan);
    }

    #[tokio::test]
    async fn test_pending_registration_is_dropped_with_its_session() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (inner, _rx) = service.connect().await;
        let client = Arc::new(LostResponseClient {
            inner,
            dropped: AtomicBool::new(false),
        });
        let single_attempt = CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 1,
                backoff_ms: 1,
                max_backoff_ms: 1,
            },
        );
        let mut registrar = NodeRegistrar::new(client.clone(), "member-", single_attempt);

        assert!(registrar.register("/election", b"a").await.is_err());
        let stale = service.children("/election").await;
        service.expire_session(client.session_id()).await;
        client.reconnect().await.unwrap();

        let node = registrar.register("/election", b"a").await.unwrap();
        assert_ne!(guid(&stale[0]), guid(node.name()));
        assert_eq!(service.children("/election").await, vec![node.name().to_string()]);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (client, _rx) = service.connect().await;
        let mut registrar = NodeRegistrar::new(Arc::new(client), "member-", policy());

        let node = registrar.register("/election", b"a").await.unwrap();
        registrar.deregister(&node).await.unwrap();
        registrar.deregister(&node).await.unwrap();
        assert!(!service.node_exists(&node.path).await);
    }
}
