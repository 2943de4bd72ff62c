use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateId, ElectionId},
    election::{Candidate, CandidateTally, Election},
};

/// An election as written by hand, e.g. in a catalog seed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub id: ElectionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub candidates: Vec<Candidate>,
}

impl From<ElectionSpec> for Election {
    fn from(spec: ElectionSpec) -> Self {
        Self {
            id: spec.id,
            title: spec.title,
            description: spec.description,
            start_time: spec.start_time,
            end_time: spec.end_time,
            candidates: spec.candidates,
        }
    }
}

/// Top-level election information, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ElectionId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
}

impl From<&Election> for ElectionSummary {
    fn from(election: &Election) -> Self {
        Self {
            id: election.id,
            title: election.title.clone(),
            start_time: election.start_time,
            end_time: election.end_time,
            is_active: election.is_active(),
        }
    }
}

/// An API-friendly election description, with live vote counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ElectionId,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub candidates: Vec<CandidateTally>,
}

impl ElectionDescription {
    /// Join an election with the ledger's counts. Candidates missing from
    /// `tally` have no votes yet.
    pub fn new(election: Election, tally: &HashMap<CandidateId, u64>) -> Self {
        let is_active = election.is_active();
        let candidates = election
            .candidates
            .into_iter()
            .map(|candidate| CandidateTally {
                vote_count: tally.get(&candidate.id).copied().unwrap_or(0),
                candidate,
            })
            .collect();
        Self {
            id: election.id,
            title: election.title,
            description: election.description,
            start_time: election.start_time,
            end_time: election.end_time,
            is_active,
            candidates,
        }
    }
}
