//! In-process coordination service
//!
//! A ZooKeeper-like namespace held in memory: persistent, ephemeral and
//! ephemeral-sequential nodes, one-shot deletion watches delivered over each
//! session's event stream, and session expiry that removes the session's
//! ephemeral nodes. Tests and the demo drive failures through the admin
//! methods (`expire_session`, `set_available`, `fail_next_lists`, ...).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::coordination::{
    is_valid_path, parent_path, CoordinationClient, CoordinationEvent, CreateMode, NodeStat,
    Session, SessionFactory, SessionId, SessionState, WatchEventKind, WatchedEvent,
};
use crate::error::CoordinationError;

/// Width ZooKeeper pads sequence suffixes to
pub const DEFAULT_SEQUENCE_WIDTH: usize = 10;

#[derive(Debug)]
struct ZNode {
    data: Vec<u8>,
    version: u64,
    ephemeral_owner: Option<SessionId>,
}

#[derive(Debug)]
struct SessionEntry {
    state: SessionState,
    events: mpsc::UnboundedSender<CoordinationEvent>,
    timeout: Duration,
    notifications: u64,
}

#[derive(Debug)]
struct Namespace {
    nodes: BTreeMap<String, ZNode>,
    sequences: HashMap<String, u64>,
    sessions: HashMap<SessionId, SessionEntry>,
    watches: HashMap<String, BTreeSet<SessionId>>,
    next_session: u64,
    sequence_width: usize,
    first_sequence: u64,
    available: bool,
    pending_list_failures: u32,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            ZNode {
                data: Vec::new(),
                version: 0,
                ephemeral_owner: None,
            },
        );
        Self {
            nodes,
            sequences: HashMap::new(),
            sessions: HashMap::new(),
            watches: HashMap::new(),
            next_session: 1,
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
            first_sequence: 0,
            available: true,
            pending_list_failures: 0,
        }
    }

    fn check_session(&self, id: SessionId) -> Result<(), CoordinationError> {
        if !self.available {
            return Err(CoordinationError::ConnectionLoss);
        }
        match self.sessions.get(&id).map(|s| s.state) {
            Some(SessionState::Connected) => Ok(()),
            Some(SessionState::Disconnected) => Err(CoordinationError::ConnectionLoss),
            _ => Err(CoordinationError::SessionExpired),
        }
    }

    fn children_of(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{}/", parent)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, _)| {
                let rest = &path[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create(
        &mut self,
        owner: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        if path == "/" || !is_valid_path(path) {
            return Err(CoordinationError::InvalidPath {
                path: path.to_string(),
            });
        }
        let parent = parent_path(path).unwrap_or("/").to_string();
        match self.nodes.get(&parent) {
            None => return Err(CoordinationError::NoNode { path: parent }),
            Some(node) if node.ephemeral_owner.is_some() => {
                return Err(CoordinationError::InvalidPath {
                    path: path.to_string(),
                })
            }
            Some(_) => {}
        }

        let actual = if mode.is_sequential() {
            let counter = self
                .sequences
                .entry(parent)
                .or_insert(self.first_sequence);
            let sequence = *counter;
            *counter += 1;
            format!("{}{:0width$}", path, sequence, width = self.sequence_width)
        } else {
            path.to_string()
        };

        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists { path: actual });
        }

        self.nodes.insert(
            actual.clone(),
            ZNode {
                data,
                version: 0,
                ephemeral_owner: mode.is_ephemeral().then_some(owner),
            },
        );
        trace!(path = %actual, ?mode, session = %owner, "node created");
        Ok(actual)
    }

    fn delete(&mut self, path: &str, expected_version: Option<u64>) -> Result<(), CoordinationError> {
        if path == "/" {
            return Err(CoordinationError::InvalidPath {
                path: path.to_string(),
            });
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })?;
        if let Some(expected) = expected_version {
            if expected != node.version {
                return Err(CoordinationError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        if !self.children_of(path).is_empty() {
            return Err(CoordinationError::NotEmpty {
                path: path.to_string(),
            });
        }

        self.nodes.remove(path);
        trace!(%path, "node deleted");
        self.fire_deleted(path);
        Ok(())
    }

    fn fire_deleted(&mut self, path: &str) {
        let Some(watchers) = self.watches.remove(path) else {
            return;
        };
        for id in watchers {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.notifications += 1;
                let _ = session.events.send(CoordinationEvent::Watch(WatchedEvent {
                    kind: WatchEventKind::NodeDeleted,
                    path: path.to_string(),
                }));
                debug!(%path, session = %id, "delivered deletion watch");
            }
        }
    }

    fn end_session(&mut self, id: SessionId, state: SessionState) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if matches!(session.state, SessionState::Connected | SessionState::Disconnected) => {
                session.state = state;
            }
            _ => return false,
        }

        for watchers in self.watches.values_mut() {
            watchers.remove(&id);
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.nodes.remove(&path);
            self.fire_deleted(&path);
        }
        true
    }
}

/// Shared in-memory coordination service
///
/// Cloning yields another handle to the same namespace.
#[derive(Debug, Clone)]
pub struct InMemoryCoordinator {
    inner: Arc<Mutex<Namespace>>,
}

impl InMemoryCoordinator {
    /// Create an empty namespace containing only `/`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    /// Pad sequence suffixes to `width` digits; `0` disables padding.
    pub fn with_sequence_width(self, width: usize) -> Self {
        self.namespace().sequence_width = width;
        self
    }

    /// Start every parent's sequence counter at `first`.
    pub fn with_first_sequence(self, first: u64) -> Self {
        self.namespace().first_sequence = first;
        self
    }

    fn namespace(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_session(&self, timeout: Duration) -> Result<Session<InMemorySession>, CoordinationError> {
        let mut ns = self.namespace();
        if !ns.available {
            return Err(CoordinationError::Unavailable(
                "in-memory coordinator is offline".to_string(),
            ));
        }

        let id = SessionId(ns.next_session);
        ns.next_session += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(CoordinationEvent::Session(SessionState::Connected));
        ns.sessions.insert(
            id,
            SessionEntry {
                state: SessionState::Connected,
                events: tx,
                timeout,
                notifications: 0,
            },
        );
        debug!(session = %id, ?timeout, "session opened");

        Ok(Session {
            client: Arc::new(InMemorySession {
                coordinator: self.clone(),
                id,
            }),
            events: rx,
        })
    }

    /// Expire a session: its ephemeral nodes vanish and it receives `Expired`.
    ///
    /// Returns `false` if the session was not live.
    pub fn expire_session(&self, id: SessionId) -> bool {
        let mut ns = self.namespace();
        if !ns.end_session(id, SessionState::Expired) {
            return false;
        }
        if let Some(session) = ns.sessions.get(&id) {
            let _ = session
                .events
                .send(CoordinationEvent::Session(SessionState::Expired));
        }
        debug!(session = %id, "session expired");
        true
    }

    /// Put a live session into the transient `Disconnected` state.
    pub fn disconnect_session(&self, id: SessionId) -> bool {
        self.set_session_link(id, SessionState::Connected, SessionState::Disconnected)
    }

    /// Bring a disconnected session back.
    pub fn reconnect_session(&self, id: SessionId) -> bool {
        self.set_session_link(id, SessionState::Disconnected, SessionState::Connected)
    }

    fn set_session_link(&self, id: SessionId, from: SessionState, to: SessionState) -> bool {
        let mut ns = self.namespace();
        match ns.sessions.get_mut(&id) {
            Some(session) if session.state == from => {
                session.state = to;
                let _ = session.events.send(CoordinationEvent::Session(to));
                true
            }
            _ => false,
        }
    }

    /// Take the whole service offline or bring it back.
    ///
    /// While offline, `connect` fails with `Unavailable` and every operation
    /// fails with `ConnectionLoss`. Sessions are not expired.
    pub fn set_available(&self, available: bool) {
        self.namespace().available = available;
    }

    /// Make the next `count` child listings fail with `ConnectionLoss`.
    pub fn fail_next_lists(&self, count: u32) {
        self.namespace().pending_list_failures = count;
    }

    /// Delete a node out-of-band, firing its watches.
    pub fn force_delete(&self, path: &str) -> Result<(), CoordinationError> {
        self.namespace().delete(path, None)
    }

    /// Relative names of a node's children, in name order.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.namespace().children_of(path)
    }

    /// Whether a node exists.
    pub fn node_exists(&self, path: &str) -> bool {
        self.namespace().nodes.contains_key(path)
    }

    /// State of a session, if it was ever opened.
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.namespace().sessions.get(&id).map(|s| s.state)
    }

    /// Session timeout requested when the session was opened.
    pub fn session_timeout(&self, id: SessionId) -> Option<Duration> {
        self.namespace().sessions.get(&id).map(|s| s.timeout)
    }

    /// Number of watch notifications delivered to a session.
    pub fn notification_count(&self, id: SessionId) -> u64 {
        self.namespace()
            .sessions
            .get(&id)
            .map(|s| s.notifications)
            .unwrap_or(0)
    }

    /// Sessions currently live.
    pub fn live_sessions(&self) -> Vec<SessionId> {
        let ns = self.namespace();
        let mut ids: Vec<SessionId> = ns
            .sessions
            .iter()
            .filter(|(_, s)| matches!(s.state, SessionState::Connected | SessionState::Disconnected))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for InMemoryCoordinator {
    type Client = InMemorySession;

    async fn connect(
        &self,
        session_timeout: Duration,
    ) -> Result<Session<InMemorySession>, CoordinationError> {
        self.open_session(session_timeout)
    }
}

/// Client bound to one session of an [`InMemoryCoordinator`]
#[derive(Debug)]
pub struct InMemorySession {
    coordinator: InMemoryCoordinator,
    id: SessionId,
}

#[async_trait]
impl CoordinationClient for InMemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn session_state(&self) -> SessionState {
        self.coordinator
            .session_state(self.id)
            .unwrap_or(SessionState::Closed)
    }

    async fn create_node(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        let mut ns = self.coordinator.namespace();
        ns.check_session(self.id)?;
        ns.create(self.id, path, data, mode)
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>, CoordinationError> {
        let mut ns = self.coordinator.namespace();
        ns.check_session(self.id)?;
        let stat = ns.nodes.get(path).map(|node| NodeStat {
            version: node.version,
            ephemeral_owner: node.ephemeral_owner,
            data_length: node.data.len(),
        });
        if watch && stat.is_some() {
            ns.watches
                .entry(path.to_string())
                .or_default()
                .insert(self.id);
            trace!(%path, session = %self.id, "watch armed");
        }
        Ok(stat)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        let mut ns = self.coordinator.namespace();
        ns.check_session(self.id)?;
        if ns.pending_list_failures > 0 {
            ns.pending_list_failures -= 1;
            return Err(CoordinationError::ConnectionLoss);
        }
        if !ns.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode {
                path: path.to_string(),
            });
        }
        Ok(ns.children_of(path))
    }

    async fn delete_node(
        &self,
        path: &str,
        expected_version: Option<u64>,
    ) -> Result<(), CoordinationError> {
        let mut ns = self.coordinator.namespace();
        ns.check_session(self.id)?;
        ns.delete(path, expected_version)
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        let mut ns = self.coordinator.namespace();
        if ns.end_session(self.id, SessionState::Closed) {
            debug!(session = %self.id, "session closed");
        }
        Ok(())
    }
}
