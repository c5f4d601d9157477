//! Leader election over ephemeral-sequential membership nodes

pub mod node;
pub mod peer;
pub mod rank;
pub mod recovery;
pub mod registrar;
pub mod state_machine;
pub mod watch;

pub use node::{MembershipNode, PeerInfo, Role};
pub use peer::ElectionPeer;
pub use rank::{RankResolver, Resolution};
pub use recovery::{RecoveryAction, SessionRecoveryManager};
pub use registrar::NodeRegistrar;
pub use state_machine::{ElectionListener, ElectionStateMachine, NoopListener, PeerStatus};
pub use watch::{DeletionEvent, WatchOutcome, WatchScheduler};
