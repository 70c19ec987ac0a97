//! Error types for leader election

use std::path::PathBuf;

use crate::coordination::SessionState;

/// Errors reported by a coordination service backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    /// The connection to the service was lost; the session may still be alive
    #[error("Connection to coordination service lost")]
    ConnectionLoss,

    /// A request did not complete in time
    #[error("Coordination operation timed out")]
    OperationTimeout,

    /// The service cannot be reached at all
    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    /// The session is dead and every ephemeral node it owned is gone
    #[error("Coordination session expired")]
    SessionExpired,

    /// A non-sequential node already exists at the path
    #[error("Node already exists: {path}")]
    NodeExists {
        /// The conflicting path
        path: String,
    },

    /// No node exists at the path
    #[error("Node does not exist: {path}")]
    NoNode {
        /// The missing path
        path: String,
    },

    /// The node's version did not match the expected version
    #[error("Version mismatch for {path}: expected {expected}, found {actual}")]
    BadVersion {
        /// The node path
        path: String,
        /// Version the caller expected
        expected: u64,
        /// Version found on the node
        actual: u64,
    },

    /// The node still has children and cannot be deleted
    #[error("Node has children: {path}")]
    NotEmpty {
        /// The node path
        path: String,
    },

    /// The path is not a valid absolute node path
    #[error("Invalid node path: {path}")]
    InvalidPath {
        /// The rejected path
        path: String,
    },
}

impl CoordinationError {
    /// Connectivity errors are transient and may be retried on the same session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss | Self::OperationTimeout | Self::Unavailable(_)
        )
    }
}

/// Errors raised by the election protocol
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// A coordination service call failed
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Creation was attempted before the session was live
    #[error("Session is not established (state: {state:?})")]
    SessionNotEstablished {
        /// The state the session was in
        state: SessionState,
    },

    /// The candidate's own node is not among the election root's children
    #[error("Candidate {candidate} is missing from {root}")]
    OwnNodeMissing {
        /// The candidate node name
        candidate: String,
        /// The election root that was listed
        root: String,
    },

    /// The predecessor kept disappearing between listing and watch arming
    #[error("Predecessor of {candidate} vanished {attempts} times before a watch could be armed")]
    PredecessorChurn {
        /// The candidate node name
        candidate: String,
        /// How many listings were attempted
        attempts: u32,
    },

    /// The service returned a candidate path without a sequence suffix
    #[error("Created node {path} has no sequence suffix")]
    MalformedCandidate {
        /// The path returned by the service
        path: String,
    },

    /// Rejoining kept failing and the configured attempt limit was reached
    #[error("Rejoin abandoned after {attempts} attempts: {source}")]
    RejoinExhausted {
        /// Number of failed attempts
        attempts: u32,
        /// The last failure
        #[source]
        source: Box<ElectionError>,
    },

    /// The background election task panicked or was aborted
    #[error("Election task terminated unexpectedly")]
    TaskTerminated,

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ElectionError {
    /// Transient connectivity failure that leaves the candidacy intact.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Coordination(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The current candidacy is unusable and a fresh join on a new session is needed.
    pub fn requires_rejoin(&self) -> bool {
        match self {
            Self::Coordination(CoordinationError::SessionExpired) => true,
            Self::OwnNodeMissing { .. } | Self::PredecessorChurn { .. } => true,
            _ => false,
        }
    }

    /// No amount of retrying or rejoining can get past this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Coordination(CoordinationError::InvalidPath { .. })
                | Self::MalformedCandidate { .. }
                | Self::Config(_)
        )
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The requested path
        path: PathBuf,
    },

    /// Figment could not merge or extract the configuration
    #[error("Failed to parse configuration: {source}")]
    Parse {
        /// The underlying figment error
        #[source]
        source: Box<figment::Error>,
    },

    /// A value is present but unusable
    #[error("Invalid configuration value for '{key}': {message}")]
    Invalid {
        /// The offending key
        key: String,
        /// Why the value was rejected
        message: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`] for `key`.
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Parse {
            source: Box::new(error),
        }
    }
}

/// Result type for election operations
pub type Result<T> = std::result::Result<T, ElectionError>;
