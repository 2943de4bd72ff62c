use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::{CandidateId, ElectionId};

/// A published election, as stored in the catalog.
///
/// Candidate set and timing are fixed once published; nothing in the voting
/// path mutates an `Election`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    /// Election title.
    pub title: String,
    /// Free-text description shown to voters.
    pub description: String,
    /// Voting opens at this instant (inclusive).
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Voting closes at this instant (inclusive).
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Candidates, in ballot order.
    pub candidates: Vec<Candidate>,
}

impl Election {
    /// Is voting open at the given instant?
    ///
    /// Derived from the voting window every time it is asked, never stored.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time
    }

    /// Is voting open right now?
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    /// Look up one of this election's candidates.
    pub fn candidate(&self, candidate_id: CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }

    /// Does the candidate belong to this election?
    pub fn has_candidate(&self, candidate_id: CandidateId) -> bool {
        self.candidate(candidate_id).is_some()
    }
}

/// A single candidate standing in an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique within the election.
    pub id: CandidateId,
    pub name: String,
    /// Party label, free text.
    pub party: String,
}

/// A candidate joined with its running vote count from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub vote_count: u64,
}
