//! Predecessor-watch leader election over a hierarchical coordination service.
//!
//! Every candidate registers an ephemeral, sequentially numbered node under a
//! shared election root. The candidate holding the smallest sequence number
//! leads; every other candidate watches only the candidate immediately below
//! it, so the loss of a leader wakes exactly one successor instead of the
//! whole group.
//!
//! # Overview
//!
//! - **Backend-agnostic**: the protocol consumes the [`CoordinationClient`] and
//!   [`SessionFactory`] traits; [`InMemoryCoordinator`] implements them in
//!   process
//! - **Numeric ordering**: candidates are ranked by their parsed sequence
//!   number, never by node-name string order
//! - **Serialized reactor**: one background task owns the session and handles
//!   watch and session events one at a time
//! - **Self-healing**: session expiry and protocol inconsistencies lead to a
//!   fresh registration on a brand-new session
//!
//! # Example
//!
//! ```ignore
//! use leader_election::{ElectionConfig, InMemoryCoordinator, LeaderElection};
//!
//! let coordinator = InMemoryCoordinator::new();
//! let handle = LeaderElection::new(coordinator, ElectionConfig::default())
//!     .join()
//!     .await?;
//!
//! if handle.is_leader() {
//!     // do leader-only work
//! }
//!
//! let mut changes = handle.subscribe();
//! changes.changed().await?;
//!
//! handle.leave().await?;
//! ```
//!
//! # Leader-only periodic work
//!
//! ```ignore
//! use leader_election::LeaderGatedScheduler;
//!
//! let scheduler = LeaderGatedScheduler::new(Duration::from_secs(5), handle.subscribe());
//! let stats = scheduler.run(&my_task, cancel_token).await;
//! ```

pub mod config;
pub mod coordination;
mod election;
pub mod error;
mod evaluator;
pub mod memory;
mod registrar;
pub mod retry;
pub mod scheduler;
pub mod sibling;
mod state;

pub use config::{ElectionConfig, ENV_PREFIX};
pub use coordination::{
    CoordinationClient, CoordinationEvent, CreateMode, NodeStat, Session, SessionFactory,
    SessionId, SessionState, WatchEventKind, WatchedEvent,
};
pub use election::{ElectionHandle, LeaderElection};
pub use error::{ConfigError, CoordinationError, ElectionError, Result};
pub use evaluator::{Evaluation, LeadershipEvaluator};
pub use memory::{InMemoryCoordinator, InMemorySession};
pub use registrar::{CandidateRegistrar, Registration};
pub use retry::RetryConfig;
pub use scheduler::{LeaderGatedScheduler, ScheduledTask, SchedulerStats};
pub use sibling::{CandidateId, SiblingSet, Standing};
pub use state::{LeadershipState, LeadershipStatus, Role};
