//! Election lifecycle: join, react to watch and session events, leave
//!
//! A single background task owns the candidate's session and serializes all
//! work on it. Watch and session notifications are drained from the
//! session's event stream one at a time; a deletion of the watched node (the
//! predecessor, or a leader's own node) triggers a re-evaluation, session
//! expiry forces a rejoin on a brand-new session. An error nothing can recover
//! from, such as an invalid path, stops the task instead of rejoining. Cancellation (explicit `leave()` or dropping the
//! handle) abandons in-flight evaluation, deletes the candidate node and
//! closes the session.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ElectionConfig;
use crate::coordination::{
    CoordinationClient, CoordinationEvent, SessionFactory, SessionId, SessionState,
    WatchEventKind, WatchedEvent,
};
use crate::error::{ElectionError, Result};
use crate::evaluator::{Evaluation, LeadershipEvaluator};
use crate::registrar::{CandidateRegistrar, Registration};
use crate::state::{LeadershipState, LeadershipStatus, Role};

/// Entry point for taking part in an election
pub struct LeaderElection<F: SessionFactory> {
    factory: Arc<F>,
    config: ElectionConfig,
}

impl<F> LeaderElection<F>
where
    F: SessionFactory + 'static,
{
    /// Create an election that opens sessions through `factory`.
    pub fn new(factory: F, config: ElectionConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
        }
    }

    /// Register as a candidate and start reacting to events.
    ///
    /// The first session, registration and evaluation happen before this
    /// returns, so their errors reach the caller. Once joined, the returned
    /// handle reflects leadership until [`ElectionHandle::leave`] is called or
    /// the handle is dropped.
    pub async fn join(self) -> Result<ElectionHandle> {
        self.config.validate()?;

        let state = Arc::new(LeadershipState::new());
        let cancel = CancellationToken::new();

        let mut reactor = WatchReactor {
            registrar: CandidateRegistrar::new(
                self.config.root_path.clone(),
                self.config.candidate_prefix.clone(),
            ),
            evaluator: LeadershipEvaluator::new(
                self.config.root_path.clone(),
                self.config.candidate_prefix.clone(),
                self.config.retry.clone(),
                self.config.max_rearm_attempts,
            ),
            factory: self.factory,
            config: self.config,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            session: None,
        };

        // Nobody holds the token yet, so the first attempt cannot be cancelled.
        reactor.session = reactor.open_session().await?;

        let task = tokio::spawn(reactor.run());

        Ok(ElectionHandle {
            state,
            cancel,
            task: Some(task),
        })
    }
}

/// Handle to a running candidacy
///
/// Dropping the handle cancels the candidacy; the node is then removed in
/// the background.
pub struct ElectionHandle {
    state: Arc<LeadershipState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl ElectionHandle {
    /// Whether this process currently believes it is the leader.
    ///
    /// This is the last evaluated snapshot, not a lease. A leader watches its
    /// own node and steps down once it sees that node deleted, but until that
    /// notification arrives a revoked leader still reads `true`.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Snapshot of the current leadership status.
    pub fn status(&self) -> LeadershipStatus {
        self.state.current()
    }

    /// Subscribe to leadership transitions.
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.state.subscribe()
    }

    /// Name of the current candidate node, if registered.
    pub fn candidate_id(&self) -> Option<String> {
        self.state.current().candidate
    }

    /// Session the current candidate node is bound to.
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.current().session
    }

    /// Shared leadership cell, for consumers that outlive borrowing the handle.
    pub fn leadership(&self) -> Arc<LeadershipState> {
        Arc::clone(&self.state)
    }

    /// Whether the background task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Leave the election.
    ///
    /// Deletes the candidate node, closes the session and waits for the
    /// background task. Returns the error the task stopped with, if any.
    pub async fn leave(mut self) -> Result<()> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "election task failed");
                    Err(ElectionError::TaskTerminated)
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for ElectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A live session together with the candidacy registered on it
struct ActiveSession<C> {
    client: Arc<C>,
    events: mpsc::UnboundedReceiver<CoordinationEvent>,
    registration: Registration,
    watched: Option<String>,
}

/// What to do after an event has been handled
enum Next {
    Continue,
    Rejoin,
    Stop(ElectionError),
}

struct WatchReactor<F: SessionFactory> {
    factory: Arc<F>,
    config: ElectionConfig,
    registrar: CandidateRegistrar,
    evaluator: LeadershipEvaluator,
    state: Arc<LeadershipState>,
    cancel: CancellationToken,
    session: Option<ActiveSession<F::Client>>,
}

impl<F> WatchReactor<F>
where
    F: SessionFactory + 'static,
{
    /// Open a session, register on it and evaluate once.
    ///
    /// Returns `Ok(None)` when cancellation wins the race; nothing is armed
    /// after that point. A failed attempt publishes `Rejoining` before closing
    /// its session, so the identity of a dead session is never left visible.
    /// Either way the closed session takes its candidate node with it.
    async fn open_session(&self) -> Result<Option<ActiveSession<F::Client>>> {
        let session = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            session = self.factory.connect(self.config.session_timeout()) => session?,
        };
        let client = session.client;

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            outcome = self.register_and_evaluate(client.as_ref()) => Some(outcome),
        };

        match outcome {
            Some(Ok((registration, evaluation))) => Ok(Some(ActiveSession {
                client,
                events: session.events,
                registration,
                watched: evaluation.watch_target,
            })),
            Some(Err(e)) => {
                self.state.transition(Role::Rejoining, None);
                close_quietly(client.as_ref()).await;
                Err(e)
            }
            None => {
                debug!(session = %client.session_id(), "cancelled while joining");
                close_quietly(client.as_ref()).await;
                Ok(None)
            }
        }
    }

    async fn register_and_evaluate(&self, client: &F::Client) -> Result<(Registration, Evaluation)> {
        let registration = self.registrar.join(client).await?;
        let evaluation = self
            .evaluator
            .evaluate(client, &registration, &self.state)
            .await?;
        Ok((registration, evaluation))
    }

    async fn run(mut self) -> Result<()> {
        loop {
            let next = match self.session.as_mut() {
                Some(active) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        event = active.events.recv() => Some(event),
                    }
                }
                None => None,
            };

            let outcome = match next {
                Some(Some(event)) => self.handle_event(event).await,
                Some(None) => {
                    warn!("coordination event stream closed");
                    self.state.transition(Role::Rejoining, None);
                    Next::Rejoin
                }
                None => Next::Rejoin,
            };

            match outcome {
                Next::Continue => {}
                Next::Stop(e) => return Err(e),
                Next::Rejoin => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.rejoin().await {
                        self.state.transition(Role::Rejoining, None);
                        return Err(e);
                    }
                }
            }
        }

        self.leave().await;
        Ok(())
    }

    async fn handle_event(&mut self, event: CoordinationEvent) -> Next {
        match event {
            CoordinationEvent::Session(SessionState::Expired) => {
                if let Some(active) = self.session.take() {
                    warn!(
                        candidate = %active.registration.id,
                        session = %active.registration.session,
                        "session expired, discarding candidacy"
                    );
                }
                self.state.transition(Role::Rejoining, None);
                Next::Rejoin
            }
            CoordinationEvent::Session(state) => {
                debug!(?state, "session state changed");
                Next::Continue
            }
            CoordinationEvent::Watch(WatchedEvent {
                kind: WatchEventKind::NodeDeleted,
                path,
            }) if self.is_watching(&path) => self.reevaluate(&path).await,
            CoordinationEvent::Watch(event) => {
                trace!(kind = ?event.kind, path = %event.path, "ignoring watch event");
                Next::Continue
            }
        }
    }

    fn is_watching(&self, path: &str) -> bool {
        self.session
            .as_ref()
            .and_then(|active| active.watched.as_deref())
            == Some(path)
    }

    async fn reevaluate(&mut self, deleted: &str) -> Next {
        let Some(active) = self.session.as_mut() else {
            return Next::Rejoin;
        };
        active.watched = None;
        debug!(
            candidate = %active.registration.id,
            watched = %deleted,
            "watched node deleted, re-evaluating"
        );

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Next::Continue,
            outcome = self.evaluator.evaluate(
                active.client.as_ref(),
                &active.registration,
                &self.state,
            ) => outcome,
        };

        let error = match outcome {
            Ok(evaluation) => {
                active.watched = evaluation.watch_target;
                return Next::Continue;
            }
            Err(e) => e,
        };

        let candidate = active.registration.id.clone();
        if error.is_fatal() {
            error!(%candidate, error = %error, "election cannot continue");
            self.abandon_session().await;
            return Next::Stop(error);
        }
        if error.requires_rejoin() {
            warn!(%candidate, error = %error, "candidacy lost, rejoining on a new session");
        } else {
            warn!(
                %candidate,
                error = %error,
                "re-evaluation failed after retries, rejoining on a new session"
            );
        }
        self.abandon_session().await;
        Next::Rejoin
    }

    /// Drop the current candidacy: delete its node if possible and close the session.
    async fn abandon_session(&mut self) {
        self.state.transition(Role::Rejoining, None);
        if let Some(active) = self.session.take() {
            release(active).await;
        }
    }

    async fn rejoin(&mut self) -> Result<()> {
        self.abandon_session().await;

        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            attempt += 1;

            match self.open_session().await {
                Ok(Some(active)) => {
                    info!(
                        candidate = %active.registration.id,
                        session = %active.registration.session,
                        attempt,
                        "rejoined election"
                    );
                    self.session = Some(active);
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    error!(attempt, error = %e, "election cannot continue");
                    return Err(e);
                }
                Err(e) => {
                    if let Some(limit) = self.config.max_rejoin_attempts {
                        if attempt >= limit {
                            error!(attempts = attempt, error = %e, "giving up on rejoining the election");
                            return Err(ElectionError::RejoinExhausted {
                                attempts: attempt,
                                source: Box::new(e),
                            });
                        }
                    }

                    let delay = self.config.retry.delay_for(attempt);
                    warn!(attempt, error = %e, ?delay, "rejoin failed, backing off");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn leave(&mut self) {
        let active = self.session.take();
        self.state.transition(Role::Resigned, None);
        if let Some(active) = active {
            info!(
                candidate = %active.registration.id,
                session = %active.registration.session,
                "leaving election"
            );
            release(active).await;
        }
    }
}

async fn close_quietly<C: CoordinationClient + ?Sized>(client: &C) {
    if let Err(e) = client.close().await {
        debug!(session = %client.session_id(), error = %e, "failed to close abandoned session");
    }
}

/// Delete the candidate node best-effort, then close the session.
async fn release<C: CoordinationClient>(active: ActiveSession<C>) {
    let registration = &active.registration;
    if let Err(e) = active.client.delete_node(&registration.path, None).await {
        debug!(
            candidate = %registration.id,
            error = %e,
            "could not delete candidate node, relying on session close"
        );
    }
    if let Err(e) = active.client.close().await {
        warn!(session = %registration.session, error = %e, "failed to close session");
    }
}
