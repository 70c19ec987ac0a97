//! Leadership evaluation: list, decide, re-arm
//!
//! One evaluation runs to completion before the next event is looked at.
//! Every evaluation that does not conclude leadership leaves exactly one
//! watch armed on the immediate predecessor, taken from a fresh listing of
//! the election root, or fails with an error that calls for a rejoin. A
//! leader instead watches its own node, so losing it out of band is noticed.

use tracing::{debug, info};

use crate::coordination::{child_path, CoordinationClient};
use crate::error::{ElectionError, Result};
use crate::registrar::Registration;
use crate::retry::RetryConfig;
use crate::sibling::{SiblingSet, Standing};
use crate::state::{LeadershipState, Role};

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether the candidate leads
    pub is_leader: bool,
    /// Absolute path of the armed watch: the predecessor when following,
    /// the candidate's own node when leading
    pub watch_target: Option<String>,
}

/// Decides leadership from the current sibling set
#[derive(Debug, Clone)]
pub struct LeadershipEvaluator {
    root: String,
    prefix: String,
    retry: RetryConfig,
    max_rearm_attempts: u32,
}

impl LeadershipEvaluator {
    /// Evaluator for candidates named `<prefix><seq>` under `root`.
    ///
    /// `max_rearm_attempts` bounds how many listings are tried when the
    /// predecessor disappears before its watch can be armed.
    pub fn new(
        root: impl Into<String>,
        prefix: impl Into<String>,
        retry: RetryConfig,
        max_rearm_attempts: u32,
    ) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            retry,
            max_rearm_attempts: max_rearm_attempts.max(1),
        }
    }

    /// List the election root, retrying connectivity failures.
    pub async fn siblings<C>(&self, client: &C) -> Result<SiblingSet>
    where
        C: CoordinationClient + ?Sized,
    {
        let root = self.root.as_str();
        let children = self
            .retry
            .retry("list_children", move || client.list_children(root))
            .await?;
        Ok(SiblingSet::from_children(children, &self.prefix))
    }

    /// Evaluate leadership for `registration` and publish the result to `state`.
    pub async fn evaluate<C>(
        &self,
        client: &C,
        registration: &Registration,
        state: &LeadershipState,
    ) -> Result<Evaluation>
    where
        C: CoordinationClient + ?Sized,
    {
        let candidate = &registration.id;

        for attempt in 1..=self.max_rearm_attempts {
            let siblings = self.siblings(client).await?;

            match siblings.standing(candidate) {
                Standing::Absent => {
                    return Err(ElectionError::OwnNodeMissing {
                        candidate: candidate.name().to_string(),
                        root: self.root.clone(),
                    });
                }
                Standing::Leader => {
                    let own = registration.path.as_str();
                    let stat = self
                        .retry
                        .retry("exists", move || client.exists(own, true))
                        .await?;
                    if stat.is_none() {
                        return Err(ElectionError::OwnNodeMissing {
                            candidate: candidate.name().to_string(),
                            root: self.root.clone(),
                        });
                    }

                    if state.transition(Role::Leading, Some(registration)) {
                        info!(
                            %candidate,
                            session = %registration.session,
                            candidates = siblings.len(),
                            "acquired leadership"
                        );
                    }
                    return Ok(Evaluation {
                        is_leader: true,
                        watch_target: Some(registration.path.clone()),
                    });
                }
                Standing::Follower { predecessor } => {
                    if state.transition(Role::Following, Some(registration)) {
                        info!(%candidate, %predecessor, "following");
                    }

                    let target = child_path(&self.root, predecessor.name());
                    let watched = target.as_str();
                    let stat = self
                        .retry
                        .retry("exists", move || client.exists(watched, true))
                        .await?;

                    if stat.is_some() {
                        debug!(%candidate, watch = %target, "armed predecessor watch");
                        return Ok(Evaluation {
                            is_leader: false,
                            watch_target: Some(target),
                        });
                    }

                    debug!(
                        %candidate,
                        %predecessor,
                        attempt,
                        "predecessor vanished before watch was armed, re-listing"
                    );
                }
            }
        }

        Err(ElectionError::PredecessorChurn {
            candidate: candidate.name().to_string(),
            attempts: self.max_rearm_attempts,
        })
    }
}
