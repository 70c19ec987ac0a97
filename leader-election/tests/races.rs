//! Interleavings that are hard to hit with real timing, injected through a
//! wrapping client.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leader_election::{
    CandidateRegistrar, CoordinationClient, CoordinationError, CreateMode, ElectionConfig,
    ElectionError, ElectionHandle, InMemoryCoordinator, InMemorySession, LeaderElection,
    LeadershipEvaluator, LeadershipState, NodeStat, RetryConfig, Role, Session, SessionFactory,
    SessionId, SessionState,
};

const ROOT: &str = "/leader-election";
const PREFIX: &str = "candidate_";
const TIMEOUT: Duration = Duration::from_secs(3);
const WAIT: Duration = Duration::from_secs(5);

/// How the wrapper interferes with the session
#[derive(Clone, Copy)]
enum Interference {
    /// Forward every call unchanged
    Passthrough,
    /// Report every path as absent without asking the service
    HideNodes,
    /// Delete the target right before the first `count` watched checks
    DeleteBeforeWatch { count: u32 },
    /// Fail every watched check with a connection loss
    FailWatchedChecks,
    /// Never answer a listing
    StallListings,
    /// Reject every node creation as an invalid path
    RejectCreates,
}

struct Interfering {
    inner: Arc<InMemorySession>,
    coordinator: InMemoryCoordinator,
    mode: Interference,
    watched_checks: AtomicU32,
}

impl Interfering {
    fn new(inner: Arc<InMemorySession>, coordinator: &InMemoryCoordinator, mode: Interference) -> Self {
        Self {
            inner,
            coordinator: coordinator.clone(),
            mode,
            watched_checks: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CoordinationClient for Interfering {
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    fn session_state(&self) -> SessionState {
        self.inner.session_state()
    }

    async fn create_node(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        if let Interference::RejectCreates = self.mode {
            return Err(CoordinationError::InvalidPath {
                path: path.to_string(),
            });
        }
        self.inner.create_node(path, data, mode).await
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>, CoordinationError> {
        match self.mode {
            Interference::HideNodes => Ok(None),
            Interference::DeleteBeforeWatch { count } => {
                if watch && self.watched_checks.fetch_add(1, Ordering::SeqCst) < count {
                    let _ = self.coordinator.force_delete(path);
                }
                self.inner.exists(path, watch).await
            }
            Interference::FailWatchedChecks if watch => Err(CoordinationError::ConnectionLoss),
            _ => self.inner.exists(path, watch).await,
        }
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        if let Interference::StallListings = self.mode {
            std::future::pending::<()>().await;
        }
        self.inner.list_children(path).await
    }

    async fn delete_node(
        &self,
        path: &str,
        expected_version: Option<u64>,
    ) -> Result<(), CoordinationError> {
        self.inner.delete_node(path, expected_version).await
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        self.inner.close().await
    }
}

/// Opens a clean first session, then interferes with every later one
struct ScriptedFactory {
    coordinator: InMemoryCoordinator,
    later: Interference,
    opened: Arc<Mutex<Vec<SessionId>>>,
}

impl ScriptedFactory {
    fn new(coordinator: &InMemoryCoordinator, later: Interference) -> Self {
        Self {
            coordinator: coordinator.clone(),
            later,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Client = Interfering;

    async fn connect(&self, session_timeout: Duration) -> Result<Session<Interfering>, CoordinationError> {
        let session = self.coordinator.connect(session_timeout).await?;
        let mut opened = self.opened.lock().unwrap();
        let mode = if opened.is_empty() {
            Interference::Passthrough
        } else {
            self.later
        };
        opened.push(session.client.session_id());
        Ok(Session {
            client: Arc::new(Interfering::new(session.client, &self.coordinator, mode)),
            events: session.events,
        })
    }
}

/// No retries inside an evaluation and a long pause between rejoin attempts
fn slow_rejoin_config() -> ElectionConfig {
    ElectionConfig {
        retry: RetryConfig {
            max_retries: 0,
            initial_delay_ms: 2000,
            backoff_multiplier: 1.0,
            max_delay_ms: 2000,
            use_jitter: false,
        },
        ..ElectionConfig::default()
    }
}

/// A plain leader plus a follower whose later sessions go through `later`.
async fn leader_and_scripted_follower(
    coordinator: &InMemoryCoordinator,
    later: Interference,
) -> (ElectionHandle, ElectionHandle, Arc<Mutex<Vec<SessionId>>>) {
    let leader = LeaderElection::new(coordinator.clone(), slow_rejoin_config())
        .join()
        .await
        .unwrap();
    let factory = ScriptedFactory::new(coordinator, later);
    let opened = Arc::clone(&factory.opened);
    let follower = LeaderElection::new(factory, slow_rejoin_config())
        .join()
        .await
        .unwrap();
    assert_eq!(follower.status().role, Role::Following);
    (leader, follower, opened)
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn second_session(opened: &Mutex<Vec<SessionId>>) -> Option<SessionId> {
    opened.lock().unwrap().get(1).copied()
}

fn evaluator(max_rearm_attempts: u32) -> LeadershipEvaluator {
    LeadershipEvaluator::new(
        ROOT,
        PREFIX,
        RetryConfig {
            max_retries: 1,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 5,
            use_jitter: false,
        },
        max_rearm_attempts,
    )
}

#[test_log::test(tokio::test)]
async fn root_creation_race_is_not_an_error() {
    let coordinator = InMemoryCoordinator::new();
    let registrar = CandidateRegistrar::new(ROOT, PREFIX);

    let winner = coordinator.connect(TIMEOUT).await.unwrap();
    registrar.join(winner.client.as_ref()).await.unwrap();

    // The loser checked before the winner created the root.
    let loser = coordinator.connect(TIMEOUT).await.unwrap();
    let stale = Interfering::new(loser.client, &coordinator, Interference::HideNodes);
    registrar.ensure_root(&stale).await.unwrap();
    let registration = registrar.join(&stale).await.unwrap();

    assert_eq!(registration.id.sequence(), 1);
    assert_eq!(coordinator.children("/"), vec!["leader-election"]);
    assert_eq!(coordinator.children(ROOT).len(), 2);
}

#[test_log::test(tokio::test)]
async fn predecessor_vanishing_before_watch_relists() {
    let coordinator = InMemoryCoordinator::new();
    let registrar = CandidateRegistrar::new(ROOT, PREFIX);

    let mut sessions = Vec::new();
    let mut registrations = Vec::new();
    for _ in 0..3 {
        let session = coordinator.connect(TIMEOUT).await.unwrap();
        registrations.push(registrar.join(session.client.as_ref()).await.unwrap());
        sessions.push(session);
    }

    let third = sessions.pop().unwrap();
    let client = Interfering::new(
        third.client,
        &coordinator,
        Interference::DeleteBeforeWatch { count: 1 },
    );
    let state = LeadershipState::new();

    let evaluation = evaluator(3)
        .evaluate(&client, &registrations[2], &state)
        .await
        .unwrap();

    // Node 1 vanished mid-evaluation, so the watch lands on node 0.
    assert!(!coordinator.node_exists(&registrations[1].path));
    assert!(!evaluation.is_leader);
    assert_eq!(evaluation.watch_target, Some(registrations[0].path.clone()));
    assert_eq!(state.current().role, Role::Following);
}

#[test_log::test(tokio::test)]
async fn successive_predecessor_losses_can_conclude_leadership() {
    let coordinator = InMemoryCoordinator::new();
    let registrar = CandidateRegistrar::new(ROOT, PREFIX);

    let mut sessions = Vec::new();
    let mut registrations = Vec::new();
    for _ in 0..3 {
        let session = coordinator.connect(TIMEOUT).await.unwrap();
        registrations.push(registrar.join(session.client.as_ref()).await.unwrap());
        sessions.push(session);
    }

    let third = sessions.pop().unwrap();
    let client = Interfering::new(
        third.client,
        &coordinator,
        Interference::DeleteBeforeWatch { count: 2 },
    );
    let state = LeadershipState::new();

    let evaluation = evaluator(3)
        .evaluate(&client, &registrations[2], &state)
        .await
        .unwrap();
    assert!(evaluation.is_leader);
    assert!(state.is_leader());
}

#[test_log::test(tokio::test)]
async fn persistent_churn_escalates_to_rejoin() {
    let coordinator = InMemoryCoordinator::new();
    let registrar = CandidateRegistrar::new(ROOT, PREFIX);

    let first = coordinator.connect(TIMEOUT).await.unwrap();
    let first_registration = registrar.join(first.client.as_ref()).await.unwrap();
    let second = coordinator.connect(TIMEOUT).await.unwrap();
    let second_registration = registrar.join(second.client.as_ref()).await.unwrap();

    // Every watched check claims the predecessor is gone while the listing still shows it.
    let client = Interfering::new(second.client, &coordinator, Interference::HideNodes);
    let state = LeadershipState::new();

    let err = evaluator(2)
        .evaluate(&client, &second_registration, &state)
        .await
        .unwrap_err();

    assert!(matches!(err, ElectionError::PredecessorChurn { attempts: 2, .. }));
    assert!(err.requires_rejoin());
    assert!(coordinator.node_exists(&first_registration.path));
    assert!(!state.is_leader());
}

#[test_log::test(tokio::test)]
async fn failed_rejoin_attempt_does_not_publish_a_closed_session() {
    let coordinator = InMemoryCoordinator::new();
    let (leader, follower, opened) =
        leader_and_scripted_follower(&coordinator, Interference::FailWatchedChecks).await;

    let first = follower.session_id().unwrap();
    assert!(coordinator.expire_session(first));

    // The second session registers, evaluates as a follower, then fails to arm its watch.
    let (shared, sessions) = (&coordinator, &opened);
    eventually(move || async move {
        second_session(sessions)
            .is_some_and(|id| shared.session_state(id) == Some(SessionState::Closed))
    })
    .await;

    let status = follower.status();
    assert_eq!(status.role, Role::Rejoining);
    assert_eq!(status.candidate, None);
    assert_eq!(status.session, None);

    // Still backing off; the identity of the closed session never comes back.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = follower.status();
    assert_eq!(status.role, Role::Rejoining);
    assert_eq!(status.session, None);
    assert_eq!(coordinator.children(ROOT).len(), 1);

    follower.leave().await.unwrap();
    leader.leave().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn leave_interrupts_a_rejoin_in_progress() {
    let coordinator = InMemoryCoordinator::new();
    let (leader, follower, opened) =
        leader_and_scripted_follower(&coordinator, Interference::StallListings).await;

    assert!(coordinator.expire_session(follower.session_id().unwrap()));

    // The new candidate is registered but its evaluation never finishes.
    let (shared, sessions) = (&coordinator, &opened);
    eventually(move || async move {
        second_session(sessions).is_some() && shared.children(ROOT).len() == 2
    })
    .await;
    let second = second_session(&opened).unwrap();

    tokio::time::timeout(WAIT, follower.leave())
        .await
        .expect("leave blocked on a stalled rejoin")
        .unwrap();

    assert_eq!(coordinator.session_state(second), Some(SessionState::Closed));
    assert_eq!(coordinator.children(ROOT).len(), 1);
    assert_eq!(opened.lock().unwrap().len(), 2);

    leader.leave().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn unrecoverable_rejoin_error_stops_the_candidacy() {
    let coordinator = InMemoryCoordinator::new();
    let (leader, follower, opened) =
        leader_and_scripted_follower(&coordinator, Interference::RejectCreates).await;

    assert!(coordinator.expire_session(follower.session_id().unwrap()));

    // No backoff loop: the task ends after the first rejected attempt.
    let handle = &follower;
    eventually(move || async move { !handle.is_running() }).await;
    assert_eq!(opened.lock().unwrap().len(), 2);
    assert_eq!(follower.status().role, Role::Rejoining);

    let err = follower.leave().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ElectionError::Coordination(CoordinationError::InvalidPath { .. })
    ));

    assert!(leader.is_leader());
    leader.leave().await.unwrap();
}
