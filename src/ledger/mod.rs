//! The authoritative store of cast votes.
//!
//! [`VoteLedger::record_vote`] is the single arbiter of "one vote per voter
//! per election": it checks and inserts as one indivisible step, so racing
//! callers for the same pair get exactly one success between them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::catalog::ElectionCatalog;
use crate::error::{Error, Result};
use crate::model::{
    common::{CandidateId, ElectionId, VoterId},
    election::Election,
    transaction::{first_invalid, VoteTransaction},
};

mod memory;
mod mongo;

pub use memory::InMemoryLedger;
pub use mongo::MongoLedger;

#[rocket::async_trait]
pub trait VoteLedger: Send + Sync {
    /// Has this voter already voted in this election?
    ///
    /// A plain lookup for failing fast. It is not authoritative: only
    /// [`VoteLedger::record_vote`] decides.
    async fn has_voted(&self, voter_id: &VoterId, election_id: ElectionId) -> Result<bool>;

    /// Record a vote, creating exactly one transaction.
    ///
    /// Fails with [`Error::AlreadyVoted`] if the voter already has a
    /// transaction for the election (this takes precedence over every other
    /// check), [`Error::ElectionNotActive`] outside the voting window and
    /// [`Error::InvalidCandidate`] for a candidate of another election. The
    /// candidate's count moves together with the log. Safe to call again
    /// after [`Error::LedgerUnavailable`].
    async fn record_vote(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<VoteTransaction>;

    /// The whole log, by ascending sequence number.
    async fn list_transactions(&self) -> Result<Vec<VoteTransaction>>;

    /// Vote count per candidate of the election. Candidates without votes
    /// may be absent.
    async fn tally(&self, election_id: ElectionId) -> Result<HashMap<CandidateId, u64>>;

    /// Audit the log. Returns the sequence number of the first entry that is
    /// out of place or whose hash does not recompute.
    async fn verify_log(&self) -> Result<Option<u64>> {
        Ok(first_invalid(&self.list_transactions().await?))
    }
}

/// Check that a ballot for `candidate_id` in `election_id` may be cast at `now`.
pub(crate) async fn validate_ballot(
    catalog: &dyn ElectionCatalog,
    election_id: ElectionId,
    candidate_id: CandidateId,
    now: DateTime<Utc>,
) -> Result<Election> {
    let election = catalog.get_election(election_id).await?;
    if !election.is_active_at(now) {
        return Err(Error::ElectionNotActive(election_id));
    }
    if !election.has_candidate(candidate_id) {
        return Err(Error::InvalidCandidate {
            election_id,
            candidate_id,
        });
    }
    Ok(election)
}
