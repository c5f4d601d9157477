//! Peer runtime
//!
//! One task per peer owns the state machine and processes watch firings,
//! session changes and commands strictly one at a time, so at most one
//! resolution cycle is ever in flight.

use crate::client::{CoordinationClient, Notification, NotificationStream, SessionId, SessionState};
use crate::common::{CallPolicy, Config, Error, Result};
use crate::election::node::{PeerInfo, Role};
use crate::election::recovery::{RecoveryAction, SessionRecoveryManager};
use crate::election::state_machine::{ElectionListener, ElectionStateMachine, PeerStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

enum Command {
    Close(oneshot::Sender<Result<()>>),
}

/// Handle to a running election peer
#[derive(Clone)]
pub struct ElectionPeer {
    status: watch::Receiver<PeerStatus>,
    commands: mpsc::Sender<Command>,
}

impl ElectionPeer {
    /// Register, resolve the first role, then keep the peer running.
    ///
    /// Startup failures are returned instead of retried in the background:
    /// `InvalidParent` is a misconfiguration, and an unreachable service
    /// after the retry policy is for the caller to handle.
    pub async fn spawn(
        config: &Config,
        client: Arc<dyn CoordinationClient>,
        notifications: NotificationStream,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Self> {
        config.validate()?;

        let info = PeerInfo::new(&config.peer_id, config.advertise_addr.clone());
        let mut machine =
            ElectionStateMachine::new(&config.election, client.clone(), &info, listener)?;
        let recovery =
            SessionRecoveryManager::new(client.session_id(), CallPolicy::from_config(&config.election));

        if let Err(e) = machine.start().await {
            tracing::error!("Peer {} failed to join the election: {}", config.peer_id, e);
            let _ = machine.close().await;
            return Err(e);
        }

        let status = machine.subscribe();
        let (commands, command_rx) = mpsc::channel(4);
        let retry_delay = config.election.retry.backoff();
        tokio::spawn(run(machine, recovery, notifications, command_rx, retry_delay));

        Ok(Self { status, commands })
    }

    pub fn status(&self) -> PeerStatus {
        self.status.borrow().clone()
    }

    pub fn role(&self) -> Role {
        self.status.borrow().role
    }

    pub fn session_id(&self) -> SessionId {
        self.status.borrow().session
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Result<PeerStatus>
    where
        F: FnMut(&PeerStatus) -> bool,
    {
        let mut status = self.status.clone();
        let reached = tokio::time::timeout(timeout, status.wait_for(|s| predicate(s))).await;
        match reached {
            Ok(Ok(current)) => Ok(current.clone()),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(format!(
                "status condition not met within {:?}",
                timeout
            ))),
        }
    }

    pub async fn wait_for_role(&self, role: Role, timeout: Duration) -> Result<PeerStatus> {
        self.wait_for(timeout, |s| s.role == role).await
    }

    /// Leave the election: delete the membership node and close the session.
    ///
    /// Idempotent; closing an already closed peer succeeds.
    pub async fn close(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).await.is_err() {
            return Ok(());
        }
        done.await.unwrap_or(Ok(()))
    }
}

async fn run(
    mut machine: ElectionStateMachine,
    mut recovery: SessionRecoveryManager,
    mut notifications: NotificationStream,
    mut commands: mpsc::Receiver<Command>,
    retry_delay: Duration,
) {
    let retry_timer = tokio::time::sleep(retry_delay);
    tokio::pin!(retry_timer);
    let mut retry_pending = false;

    loop {
        let mut fired = false;
        let result = tokio::select! {
            biased;

            command = commands.recv() => {
                // A dropped handle closes the peer too
                let result = machine.close().await;
                if let Some(Command::Close(reply)) = command {
                    let _ = reply.send(result);
                }
                break;
            }

            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    tracing::warn!("Notification stream closed, shutting the peer down");
                    let _ = machine.close().await;
                    break;
                };
                dispatch(&mut machine, &mut recovery, notification).await
            }

            () = &mut retry_timer, if retry_pending => {
                fired = true;
                tracing::info!("Retrying election after earlier fault");
                recovery.resume(&mut machine).await
            }
        };

        let pending = settle(&mut machine, &mut recovery, result, retry_pending).await;
        // Armed once per fault; unrelated notifications must not push it back
        if pending && (fired || !retry_pending) {
            retry_timer
                .as_mut()
                .reset(tokio::time::Instant::now() + retry_delay);
        }
        retry_pending = pending;
    }
}

async fn dispatch(
    machine: &mut ElectionStateMachine,
    recovery: &mut SessionRecoveryManager,
    notification: Notification,
) -> Result<()> {
    match notification {
        Notification::Watch { session, event } => machine.handle_watch(session, &event).await,
        Notification::Session { session, state } => match recovery.observe(session, state) {
            RecoveryAction::Recover => recovery.recover(machine).await,
            RecoveryAction::None => Ok(()),
        },
    }
}

/// Report a failed step and decide whether a retry is pending
async fn settle(
    machine: &mut ElectionStateMachine,
    recovery: &mut SessionRecoveryManager,
    result: Result<()>,
    retry_pending: bool,
) -> bool {
    let error = match result {
        Ok(()) => return retry_pending && machine.role() == Role::Unresolved,
        // An operation noticed the loss before the notification did
        Err(Error::SessionLost(reason)) => {
            tracing::warn!("Session lost during election: {}", reason);
            let session = machine.client().session_id();
            match recovery.observe(session, SessionState::Lost) {
                RecoveryAction::Recover => match recovery.recover(machine).await {
                    Ok(()) => return false,
                    Err(e) => e,
                },
                RecoveryAction::None => return true,
            }
        }
        Err(e) => e,
    };

    tracing::error!("Election fault: {}", error);
    machine.listener().on_error(&error);
    !error.is_fatal()
}
