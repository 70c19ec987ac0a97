//! Candidate identities and the ordered sibling snapshot
//!
//! The leader is always the live candidate with the smallest sequence
//! number. Ordering is numeric on the parsed suffix, never on the raw node
//! name: `candidate_10` ranks after `candidate_9` even though it sorts before
//! it as a string.

use std::cmp::Ordering;
use std::fmt;

/// A candidate node name together with its parsed sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateId {
    name: String,
    sequence: u64,
}

impl CandidateId {
    /// Parse a relative node name of the form `<prefix><digits>`.
    ///
    /// Returns `None` for names that do not carry the prefix or whose suffix
    /// is not entirely ASCII digits.
    pub fn parse(name: &str, prefix: &str) -> Option<Self> {
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse().ok()?;
        Some(Self {
            name: name.to_string(),
            sequence,
        })
    }

    /// The relative node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service-assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Ord for CandidateId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for CandidateId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where a candidate stands within a sibling snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standing {
    /// The candidate holds the minimum sequence number
    Leader,
    /// Another candidate ranks lower; watch `predecessor`
    Follower {
        /// The immediately lower-ranked sibling
        predecessor: CandidateId,
    },
    /// The candidate's own node is not in the snapshot
    Absent,
}

/// Snapshot of the candidates under the election root, in rank order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiblingSet {
    members: Vec<CandidateId>,
}

impl SiblingSet {
    /// Build a snapshot from listed child names.
    ///
    /// Children that are not candidate nodes are ignored.
    pub fn from_children<I, S>(children: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: Vec<CandidateId> = children
            .into_iter()
            .filter_map(|name| CandidateId::parse(name.as_ref(), prefix))
            .collect();
        members.sort_unstable();
        members.dedup();
        Self { members }
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no candidate is present.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The lowest-ranked candidate.
    pub fn leader(&self) -> Option<&CandidateId> {
        self.members.first()
    }

    /// Candidates in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &CandidateId> {
        self.members.iter()
    }

    /// Rank of `id`, if present.
    pub fn position(&self, id: &CandidateId) -> Option<usize> {
        self.members.binary_search(id).ok()
    }

    /// The candidate ranked immediately below `id`.
    pub fn predecessor_of(&self, id: &CandidateId) -> Option<&CandidateId> {
        match self.position(id) {
            Some(idx) if idx > 0 => self.members.get(idx - 1),
            _ => None,
        }
    }

    /// Decide whether `id` leads, and if not which sibling it should watch.
    pub fn standing(&self, id: &CandidateId) -> Standing {
        match self.position(id) {
            None => Standing::Absent,
            Some(0) => Standing::Leader,
            Some(idx) => Standing::Follower {
                predecessor: self.members[idx - 1].clone(),
            },
        }
    }
}
