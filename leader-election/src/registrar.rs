//! Candidate registration under the election root

use tracing::{debug, info};

use crate::coordination::{
    ancestors_inclusive, child_path, node_name, CoordinationClient, CreateMode, SessionId,
    SessionState,
};
use crate::error::{CoordinationError, ElectionError, Result};
use crate::sibling::CandidateId;

/// Identity of a registered candidate, valid for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Parsed candidate name
    pub id: CandidateId,
    /// Absolute path of the candidate node
    pub path: String,
    /// Session the node is bound to
    pub session: SessionId,
}

/// Creates the election root and this process's candidate node
#[derive(Debug, Clone)]
pub struct CandidateRegistrar {
    root: String,
    prefix: String,
}

impl CandidateRegistrar {
    /// Registrar for candidates named `<prefix><seq>` under `root`.
    pub fn new(root: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Create the election root and any missing ancestors as persistent nodes.
    ///
    /// Losing a creation race to another candidate counts as success.
    pub async fn ensure_root<C>(&self, client: &C) -> Result<()>
    where
        C: CoordinationClient + ?Sized,
    {
        for path in ancestors_inclusive(&self.root) {
            if client.exists(&path, false).await?.is_some() {
                continue;
            }
            match client
                .create_node(&path, Vec::new(), CreateMode::Persistent)
                .await
            {
                Ok(_) => debug!(%path, "created persistent node"),
                Err(CoordinationError::NodeExists { .. }) => {
                    debug!(%path, "persistent node created concurrently")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Register a candidate on `client`'s session.
    ///
    /// Call once per session; a fresh candidacy needs a fresh session.
    /// Connectivity errors propagate unchanged so the caller picks the
    /// retry policy.
    pub async fn join<C>(&self, client: &C) -> Result<Registration>
    where
        C: CoordinationClient + ?Sized,
    {
        let state = client.session_state();
        if state != SessionState::Connected {
            return Err(ElectionError::SessionNotEstablished { state });
        }

        self.ensure_root(client).await?;

        let path = client
            .create_node(
                &child_path(&self.root, &self.prefix),
                Vec::new(),
                CreateMode::EphemeralSequential,
            )
            .await?;

        let id = CandidateId::parse(node_name(&path), &self.prefix)
            .ok_or_else(|| ElectionError::MalformedCandidate { path: path.clone() })?;
        let session = client.session_id();

        info!(candidate = %id, %session, root = %self.root, "registered candidate");
        Ok(Registration { id, path, session })
    }
}
