//! # minielect
//!
//! Leader election and failover for a fleet of peers sharing a coordination
//! service:
//! - Ephemeral-sequential membership nodes, ranked by sequence number
//! - Rank 0 leads; every other peer watches only its immediate predecessor
//! - Session loss voids any role until the peer has registered again
//! - In-memory coordination backend with fault injection for tests and demos
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           Coordination service               │
//! │  /election                                   │
//! │    member-<guid>-0000000001   ◄── leader     │
//! │    member-<guid>-0000000002   watches ..01   │
//! │    member-<guid>-0000000003   watches ..02   │
//! └───────────┬──────────────────────────────────┘
//!             │ sessions, one-shot watches
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ Peer A     │   │ Peer B     │   │ Peer C     │
//! │ (Leader)   │   │ (Follower) │   │ (Follower) │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run a fleet of five peers through three leader failures
//! minielect-sim simulate --peers 5 --rounds 3
//!
//! # Show the effective configuration
//! minielect-sim config --config ./minielect.toml
//! ```

pub mod client;
pub mod common;
pub mod election;

// Re-export commonly used types
pub use client::{CoordinationClient, MemoryCoordinator};
pub use common::{Config, Error, Result};
pub use election::{ElectionListener, ElectionPeer, PeerStatus, Role};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
