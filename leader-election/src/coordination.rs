//! Contract consumed from the hierarchical coordination service
//!
//! The election protocol only needs a handful of primitives from a
//! ZooKeeper-like store: node creation (persistent, ephemeral and
//! ephemeral-sequential), existence checks with one-shot watches, child
//! listing, deletion, and a serial stream of watch and session events.
//! Any backend that satisfies [`CoordinationClient`] and [`SessionFactory`]
//! can host an election.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoordinationError;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the session that created it
    Persistent,
    /// Removed when the owning session ends
    Ephemeral,
    /// Ephemeral, with a service-assigned increasing suffix appended to the name
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the node is bound to its creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    /// Whether the service appends a sequence number.
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::EphemeralSequential)
    }
}

/// Identifier of a coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Metadata returned by an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Data version, incremented on every change
    pub version: u64,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    /// Length of the node's data in bytes
    pub data_length: usize,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Live; operations are accepted
    Connected,
    /// Transiently disconnected; the client retries on its own
    Disconnected,
    /// Dead; every ephemeral node owned by the session has been removed
    Expired,
    /// Closed on request
    Closed,
}

/// Kind of change reported by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The node was created
    NodeCreated,
    /// The node was deleted
    NodeDeleted,
    /// The node's data changed
    NodeDataChanged,
    /// The node's children changed
    ChildrenChanged,
}

/// A fired one-shot watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What happened
    pub kind: WatchEventKind,
    /// Absolute path of the watched node
    pub path: String,
}

/// Notification delivered on a session's event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// A watch registered by this session fired
    Watch(WatchedEvent),
    /// The session changed state
    Session(SessionState),
}

/// Primitives of a hierarchical coordination service bound to one session
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// The session this client operates on.
    fn session_id(&self) -> SessionId;

    /// Current state of the session.
    fn session_state(&self) -> SessionState;

    /// Create a node and return its actual path.
    ///
    /// For sequential modes the service appends a strictly increasing number to
    /// `path`. For other modes an existing node yields
    /// [`CoordinationError::NodeExists`].
    async fn create_node(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, CoordinationError>;

    /// Check whether a node exists.
    ///
    /// With `watch` set and the node present, a one-shot notification is
    /// registered that fires on the node's next deletion.
    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>, CoordinationError>;

    /// List the relative names of a node's children.
    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Delete a node. `None` matches any version.
    async fn delete_node(
        &self,
        path: &str,
        expected_version: Option<u64>,
    ) -> Result<(), CoordinationError>;

    /// Close the session, removing its ephemeral nodes.
    async fn close(&self) -> Result<(), CoordinationError>;
}

/// A freshly opened session and its event stream
pub struct Session<C> {
    /// Client bound to the session
    pub client: Arc<C>,
    /// Watch and session events, delivered serially
    pub events: mpsc::UnboundedReceiver<CoordinationEvent>,
}

/// Opens brand-new sessions against a coordination service
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Client type bound to a session
    type Client: CoordinationClient + 'static;

    /// Open a new session. Each call yields a distinct session.
    async fn connect(
        &self,
        session_timeout: Duration,
    ) -> Result<Session<Self::Client>, CoordinationError>;
}

/// Join a parent path and a relative child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Last segment of an absolute path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of an absolute path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Every proper prefix of `path` plus `path` itself, shallowest first.
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub fn ancestors_inclusive(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// Whether `path` is an absolute node path without empty segments.
pub fn is_valid_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/') && !path.ends_with('/') && !path[1..].split('/').any(str::is_empty)
}
