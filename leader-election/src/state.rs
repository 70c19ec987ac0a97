//! Process-wide leadership state
//!
//! Only the election reactor writes to this cell. Everyone else reads a
//! snapshot or subscribes to changes; reads never block and always return
//! the last value the evaluator computed.

use tokio::sync::watch;

use crate::coordination::SessionId;
use crate::registrar::Registration;

/// Role of this process in the election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registered and watching a predecessor
    Following,
    /// Holding the lowest sequence number
    Leading,
    /// Between sessions; the old identity has been discarded
    Rejoining,
    /// Left the election for good
    Resigned,
}

/// Snapshot of the leadership state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipStatus {
    /// Current role
    pub role: Role,
    /// Incremented on every transition
    pub epoch: u64,
    /// Candidate node name while registered
    pub candidate: Option<String>,
    /// Session the candidate node is bound to
    pub session: Option<SessionId>,
}

impl LeadershipStatus {
    /// Whether this process currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leading
    }
}

impl Default for LeadershipStatus {
    fn default() -> Self {
        Self {
            role: Role::Rejoining,
            epoch: 0,
            candidate: None,
            session: None,
        }
    }
}

/// Synchronized leadership cell with change notification
#[derive(Debug)]
pub struct LeadershipState {
    tx: watch::Sender<LeadershipStatus>,
}

impl LeadershipState {
    /// Create a cell that starts out without a registered candidate.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LeadershipStatus::default());
        Self { tx }
    }

    /// Whether the last evaluation concluded leadership.
    pub fn is_leader(&self) -> bool {
        self.tx.borrow().is_leader()
    }

    /// Copy of the current status.
    pub fn current(&self) -> LeadershipStatus {
        self.tx.borrow().clone()
    }

    /// Receive every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.tx.subscribe()
    }

    /// Apply a transition. Returns `true` if the status changed.
    ///
    /// The epoch only moves when the role or the candidate identity changes,
    /// so repeated evaluations with the same outcome do not wake subscribers.
    pub(crate) fn transition(&self, role: Role, registration: Option<&Registration>) -> bool {
        let candidate = registration.map(|r| r.id.name().to_string());
        let session = registration.map(|r| r.session);

        self.tx.send_if_modified(|status| {
            if status.role == role && status.candidate == candidate && status.session == session {
                return false;
            }
            status.role = role;
            status.candidate = candidate;
            status.session = session;
            status.epoch += 1;
            true
        })
    }
}

impl Default for LeadershipState {
    fn default() -> Self {
        Self::new()
    }
}
