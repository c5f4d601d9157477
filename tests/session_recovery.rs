//! Session loss, suspension and startup faults

use minielect::client::MemoryCoordinator;
use minielect::common::{Config, Error, RetryPolicy};
use minielect::election::{ElectionListener, ElectionPeer, MembershipNode, NoopListener, Role};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config(peer_id: &str) -> Config {
    let mut config = Config::default();
    config.peer_id = peer_id.to_string();
    config.election.operation_timeout_ms = 1000;
    config.election.retry = RetryPolicy {
        max_attempts: 2,
        backoff_ms: 10,
        max_backoff_ms: 20,
    };
    config
}

async fn service() -> MemoryCoordinator {
    let service = MemoryCoordinator::new();
    service.ensure_path("/election").await.unwrap();
    service
}

async fn spawn_with(
    service: &MemoryCoordinator,
    peer_id: &str,
    listener: Arc<dyn ElectionListener>,
) -> ElectionPeer {
    let (client, notifications) = service.connect().await;
    ElectionPeer::spawn(&config(peer_id), Arc::new(client), notifications, listener)
        .await
        .unwrap()
}

async fn spawn(service: &MemoryCoordinator, peer_id: &str) -> ElectionPeer {
    spawn_with(service, peer_id, Arc::new(NoopListener)).await
}

#[derive(Default)]
struct CountingListener {
    leader: AtomicUsize,
    errors: AtomicUsize,
}

impl ElectionListener for CountingListener {
    fn on_become_leader(&self) {
        self.leader.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error: &Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wait until every peer holds a role, exactly one leads, and the leader
/// holds the smallest node; returns the leader's index
async fn settled(fleet: &[ElectionPeer], previous: Option<&MembershipNode>) -> usize {
    let started = tokio::time::Instant::now();
    loop {
        let statuses: Vec<_> = fleet.iter().map(|p| p.status()).collect();
        let resolved = statuses
            .iter()
            .all(|s| matches!(s.role, Role::Leader | Role::Follower));
        let leaders: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.role == Role::Leader)
            .map(|(i, _)| i)
            .collect();

        if resolved && leaders.len() == 1 {
            let leader = statuses[leaders[0]].node.as_ref().unwrap();
            let smallest = statuses
                .iter()
                .filter_map(|s| s.node.as_ref())
                .map(|n| n.sequence)
                .min()
                .unwrap();
            if Some(leader) != previous && leader.sequence == smallest {
                return leaders[0];
            }
        }

        assert!(
            started.elapsed() < WAIT,
            "fleet did not settle: {:?}",
            statuses
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_repeated_failovers_keep_a_single_leader() {
    let service = service().await;
    let mut fleet = Vec::new();
    for i in 0..5 {
        fleet.push(spawn(&service, &format!("peer-{}", i)).await);
    }

    let mut previous: Option<MembershipNode> = None;
    for _ in 0..8 {
        let leader = settled(&fleet, previous.as_ref()).await;
        let status = fleet[leader].status();
        previous = status.node.clone();
        service.expire_session(status.session).await;
    }
    settled(&fleet, previous.as_ref()).await;

    let total: u64 = fleet.iter().map(|p| p.status().recoveries).sum();
    assert_eq!(total, 8);
    assert_eq!(service.children("/election").await.len(), 5);

    for peer in &fleet {
        peer.close().await.unwrap();
    }
    assert!(service.children("/election").await.is_empty());
}

#[tokio::test]
async fn test_suspend_and_resume_keeps_election_state() {
    let service = service().await;
    let a = spawn(&service, "a").await;
    let b = spawn(&service, "b").await;
    let before_a = a.status();
    let before_b = b.status();

    for _ in 0..3 {
        service.suspend_session(a.session_id()).await;
        service.suspend_session(b.session_id()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.resume_session(a.session_id()).await;
        service.resume_session(b.session_id()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(a.status(), before_a);
    assert_eq!(b.status(), before_b);
    assert_eq!(service.children("/election").await.len(), 2);
}

#[tokio::test]
async fn test_suspension_past_timeout_becomes_loss() {
    let service = MemoryCoordinator::with_session_timeout(Duration::from_millis(50));
    service.ensure_path("/election").await.unwrap();
    let a = spawn(&service, "a").await;
    let b = spawn(&service, "b").await;
    let old_a = a.status().node.unwrap();

    service.suspend_session(a.session_id()).await;

    b.wait_for_role(Role::Leader, WAIT).await.unwrap();
    let status = a
        .wait_for(WAIT, |s| s.recoveries == 1 && s.role == Role::Follower)
        .await
        .unwrap();
    assert_ne!(status.node.unwrap().path, old_a.path);
}

#[tokio::test]
async fn test_missing_root_fails_at_startup() {
    let service = MemoryCoordinator::new();
    let (client, notifications) = service.connect().await;

    let result = ElectionPeer::spawn(
        &config("a"),
        Arc::new(client),
        notifications,
        Arc::new(NoopListener),
    )
    .await;

    assert!(matches!(result, Err(Error::InvalidParent(p)) if p == "/election"));
}

#[tokio::test]
async fn test_unreachable_service_fails_at_startup() {
    let service = service().await;
    let (client, notifications) = service.connect().await;
    service.set_available(false).await;

    let result = ElectionPeer::spawn(
        &config("a"),
        Arc::new(client),
        notifications,
        Arc::new(NoopListener),
    )
    .await;

    assert!(matches!(result, Err(Error::CoordinationUnavailable(_))));
    service.set_available(true).await;
    assert!(service.children("/election").await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let service = service().await;
    let (client, notifications) = service.connect().await;
    let mut config = config("a");
    config.election.root = "relative".into();

    let result =
        ElectionPeer::spawn(&config, Arc::new(client), notifications, Arc::new(NoopListener)).await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_recovery_waits_out_an_outage() {
    let service = service().await;
    let listener = Arc::new(CountingListener::default());
    let a = spawn_with(&service, "a", listener.clone()).await;
    assert_eq!(listener.leader.load(Ordering::SeqCst), 1);

    service.set_available(false).await;
    service.expire_session(a.session_id()).await;

    // Reconnect attempts fail and are reported while the peer holds no role
    a.wait_for(WAIT, |s| s.role == Role::Unresolved).await.unwrap();
    let started = tokio::time::Instant::now();
    while listener.errors.load(Ordering::SeqCst) == 0 {
        assert!(started.elapsed() < WAIT, "no fault reported");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(service.children("/election").await.is_empty());

    service.set_available(true).await;
    let status = a.wait_for_role(Role::Leader, WAIT).await.unwrap();
    assert_eq!(status.recoveries, 1);
    assert_eq!(listener.leader.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_closed_peer_ignores_later_session_events() {
    let service = service().await;
    let a = spawn(&service, "a").await;
    let session = a.session_id();

    a.close().await.unwrap();
    service.expire_session(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(a.role(), Role::Closed);
    assert!(service.children("/election").await.is_empty());
}
