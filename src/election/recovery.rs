//! Session recovery
//!
//! `Suspended` is a transient disconnection: operations fail over to the
//! retry policy and the election state is kept. `Lost` means the service has
//! already deleted this peer's ephemeral node, so every local reference is
//! dropped and the peer registers from scratch on a fresh session before any
//! role is trusted again.

use crate::client::{SessionId, SessionState};
use crate::common::{CallPolicy, Result};
use crate::election::state_machine::ElectionStateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    Recover,
}

pub struct SessionRecoveryManager {
    session: SessionId,
    state: SessionState,
    policy: CallPolicy,
}

impl SessionRecoveryManager {
    pub fn new(session: SessionId, policy: CallPolicy) -> Self {
        Self {
            session,
            state: SessionState::Connected,
            policy,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Track a session-state change; only loss of the current session
    /// requires recovery
    pub fn observe(&mut self, session: SessionId, state: SessionState) -> RecoveryAction {
        if session != self.session {
            tracing::debug!(
                "Ignoring {} for session {} (current session is {})",
                state,
                session,
                self.session
            );
            return RecoveryAction::None;
        }

        let previous = std::mem::replace(&mut self.state, state);
        match state {
            SessionState::Connecting => RecoveryAction::None,
            SessionState::Connected => {
                if previous == SessionState::Suspended {
                    tracing::info!("Session {} reconnected, election state kept", session);
                }
                RecoveryAction::None
            }
            SessionState::Suspended => {
                tracing::warn!("Session {} suspended, holding election state", session);
                RecoveryAction::None
            }
            SessionState::Lost if previous == SessionState::Lost => RecoveryAction::None,
            SessionState::Lost => {
                tracing::warn!("Session {} lost", session);
                RecoveryAction::Recover
            }
        }
    }

    /// Invalidate local state, open a new session, register and elect again
    pub async fn recover(&mut self, machine: &mut ElectionStateMachine) -> Result<()> {
        machine.on_session_lost();
        self.state = SessionState::Lost;

        let client = machine.client().clone();
        let session = self
            .policy
            .run("reconnect", || client.reconnect())
            .await?;
        tracing::info!("Session {} replaced by {}", self.session, session);
        self.session = session;
        self.state = SessionState::Connected;
        machine.record_recovery();

        machine.start().await
    }

    /// Retry whichever step failed last
    pub async fn resume(&mut self, machine: &mut ElectionStateMachine) -> Result<()> {
        if self.state == SessionState::Lost {
            self.recover(machine).await
        } else {
            machine.start().await
        }
    }
}
