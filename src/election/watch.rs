//! Predecessor watch
//!
//! A follower arms exactly one watch, on its immediate predecessor, so a
//! deletion wakes a single peer no matter how large the fleet is. The
//! service's watches are one-shot: any firing that is not a deletion is
//! reinstalled here, otherwise the peer would silently stop hearing about its
//! predecessor.

use crate::client::{CoordinationClient, EventKind, SessionId, WatchedEvent};
use crate::common::{CallPolicy, Error, Result};
use std::sync::Arc;

/// The single watch currently armed by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedWatch {
    pub path: String,
    pub session: SessionId,
}

/// The watched predecessor is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Deleted(DeletionEvent),
    /// Fired for another reason; armed again on the same node
    Rearmed,
    /// Not for the armed watch (other path, old session, nothing armed)
    Ignored,
}

pub struct WatchScheduler {
    client: Arc<dyn CoordinationClient>,
    policy: CallPolicy,
    armed: Option<ArmedWatch>,
}

impl WatchScheduler {
    pub fn new(client: Arc<dyn CoordinationClient>, policy: CallPolicy) -> Self {
        Self {
            client,
            policy,
            armed: None,
        }
    }

    pub fn armed(&self) -> Option<&ArmedWatch> {
        self.armed.as_ref()
    }

    /// Arm a deletion watch on `path`, replacing any previous watch.
    ///
    /// Fails with `WatchExpired` if the node is already gone; the caller must
    /// re-resolve right away instead of waiting.
    pub async fn watch_predecessor(&mut self, path: &str) -> Result<()> {
        self.cancel().await;

        let session = self.client.session_id();
        let client = &self.client;
        let present = self
            .policy
            .run("exists", || client.exists(path, true))
            .await?;

        if !present {
            self.remove_watches(path).await;
            return Err(Error::WatchExpired(path.to_string()));
        }

        tracing::debug!("Watching predecessor {}", path);
        self.armed = Some(ArmedWatch {
            path: path.to_string(),
            session,
        });
        Ok(())
    }

    /// Feed a fired watch from the notification stream
    pub async fn on_event(&mut self, session: SessionId, event: &WatchedEvent) -> Result<WatchOutcome> {
        let path = match &self.armed {
            Some(armed) if armed.session == session && armed.path == event.path => {
                armed.path.clone()
            }
            _ => return Ok(WatchOutcome::Ignored),
        };

        if event.kind == EventKind::NodeDeleted {
            self.armed = None;
            return Ok(WatchOutcome::Deleted(DeletionEvent { path }));
        }

        // The firing consumed the watch; arm it again
        let client = &self.client;
        let present = self
            .policy
            .run("exists", || client.exists(&path, true))
            .await;
        match present {
            Ok(true) => {
                tracing::debug!("Re-armed watch on {} after {:?}", path, event.kind);
                Ok(WatchOutcome::Rearmed)
            }
            Ok(false) => {
                self.armed = None;
                self.remove_watches(&path).await;
                Ok(WatchOutcome::Deleted(DeletionEvent { path }))
            }
            Err(e) => {
                self.armed = None;
                Err(e)
            }
        }
    }

    /// Best-effort deregistration of the armed watch
    pub async fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            self.remove_watches(&armed.path).await;
        }
    }

    /// Best-effort; failures are logged
    async fn remove_watches(&self, path: &str) {
        if let Err(e) = self.client.remove_watches(path).await {
            tracing::debug!("Failed to remove watch on {}: {}", path, e);
        }
    }

    /// Forget the armed watch without talking to the service; used when the
    /// session that owned it is gone
    pub fn invalidate(&mut self) {
        self.armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CreateMode, MemoryCoordinator, Notification, NotificationStream};
    use crate::common::RetryPolicy;
    use std::time::Duration;

    fn policy() -> CallPolicy {
        CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 2,
                backoff_ms: 1,
                max_backoff_ms: 1,
            },
        )
    }

    fn next_watch(rx: &mut NotificationStream) -> Option<(SessionId, WatchedEvent)> {
        while let Ok(n) = rx.try_recv() {
            if let Notification::Watch { session, event } = n {
                return Some((session, event));
            }
        }
        None
    }

    async fn setup() -> (MemoryCoordinator, Arc<dyn CoordinationClient>, NotificationStream, String) {
        let service = MemoryCoordinator::new();
        service.ensure_path("/election").await.unwrap();
        let (other, _) = service.connect().await;
        let predecessor = other
            .create("/election/m-", b"p", CreateMode::PersistentSequential)
            .await
            .unwrap();
        let (client, rx) = service.connect().await;
        let client: Arc<dyn CoordinationClient> = Arc::new(client);
        (service, client, rx, predecessor)
    }

    #[tokio::test]
    async fn test_deletion_resolves_watch() {
        let (service, client, mut rx, predecessor) = setup().await;
        let mut scheduler = WatchScheduler::new(client.clone(), policy());

        scheduler.watch_predecessor(&predecessor).await.unwrap();
        assert_eq!(scheduler.armed().unwrap().path, predecessor);

        let (other, _) = service.connect().await;
        other.delete(&predecessor).await.unwrap();

        let (session, event) = next_watch(&mut rx).unwrap();
        let outcome = scheduler.on_event(session, &event).await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::Deleted(DeletionEvent {
                path: predecessor.clone()
            })
        );
        assert!(scheduler.armed().is_none());
    }

    #[tokio::test]
    async fn test_missing_predecessor_expires_watch() {
        let (_service, client, _rx, _) = setup().await;
        let mut scheduler = WatchScheduler::new(client, policy());

        let result = scheduler.watch_predecessor("/election/m-0000000099").await;
        assert!(matches!(result, Err(Error::WatchExpired(_))));
        assert!(scheduler.armed().is_none());
    }

    #[tokio::test]
    async fn test_data_change_rearms_watch() {
        let (service, client, mut rx, predecessor) = setup().await;
        let mut scheduler = WatchScheduler::new(client.clone(), policy());
        scheduler.watch_predecessor(&predecessor).await.unwrap();

        let (other, _) = service.connect().await;
        other.set_data(&predecessor, b"changed").await.unwrap();
        let (session, event) = next_watch(&mut rx).unwrap();
        assert_eq!(
            scheduler.on_event(session, &event).await.unwrap(),
            WatchOutcome::Rearmed
        );

        // Still notified after the one-shot watch fired once
        other.delete(&predecessor).await.unwrap();
        let (session, event) = next_watch(&mut rx).unwrap();
        assert!(matches!(
            scheduler.on_event(session, &event).await.unwrap(),
            WatchOutcome::Deleted(_)
        ));
    }

    #[tokio::test]
    async fn test_events_from_old_session_are_ignored() {
        let (_service, client, _rx, predecessor) = setup().await;
        let mut scheduler = WatchScheduler::new(client.clone(), policy());
        scheduler.watch_predecessor(&predecessor).await.unwrap();

        let stale = WatchedEvent {
            kind: EventKind::NodeDeleted,
            path: predecessor.clone(),
        };
        let outcome = scheduler
            .on_event(client.session_id() + 100, &stale)
            .await
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Ignored);
        assert!(scheduler.armed().is_some());

        let unrelated = WatchedEvent {
            kind: EventKind::NodeDeleted,
            path: "/election/m-0000000042".into(),
        };
        let outcome = scheduler
            .on_event(client.session_id(), &unrelated)
            .await
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_rewatch_replaces_previous_watch() {
        let (service, client, mut rx, predecessor) = setup().await;
        let (other, _) = service.connect().await;
        let second = other
            .create("/election/m-", b"q", CreateMode::PersistentSequential)
            .await
            .unwrap();

        let mut scheduler = WatchScheduler::new(client.clone(), policy());
        scheduler.watch_predecessor(&predecessor).await.unwrap();
        scheduler.watch_predecessor(&second).await.unwrap();

        other.delete(&predecessor).await.unwrap();
        assert!(next_watch(&mut rx).is_none());
        assert_eq!(scheduler.armed().unwrap().path, second);
    }

    #[tokio::test]
    async fn test_cancel_while_service_unreachable() {
        let (service, client, mut rx, predecessor) = setup().await;
        let mut scheduler = WatchScheduler::new(client.clone(), policy());
        scheduler.watch_predecessor(&predecessor).await.unwrap();

        service.set_available(false).await;
        scheduler.cancel().await;
        assert!(scheduler.armed().is_none());

        // The service still holds the watch that could not be removed
        service.set_available(true).await;
        let (other, _) = service.connect().await;
        other.delete(&predecessor).await.unwrap();
        let (session, event) = next_watch(&mut rx).unwrap();
        assert_eq!(
            scheduler.on_event(session, &event).await.unwrap(),
            WatchOutcome::Ignored
        );
    }
}
