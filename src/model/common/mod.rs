use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Our election IDs are integers.
pub type ElectionId = u32;
/// Our candidate IDs are integers, unique within their election.
pub type CandidateId = u32;

/// An externally issued voter identity.
///
/// This is opaque to us: the identity source has already authenticated it,
/// so we never inspect or re-derive it.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Verification sessions, workflows and votes are all scoped to one voter
/// in one election.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub voter_id: VoterId,
    pub election_id: ElectionId,
}

impl SessionKey {
    pub fn new(voter_id: VoterId, election_id: ElectionId) -> Self {
        Self {
            voter_id,
            election_id,
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.voter_id, self.election_id)
    }
}
