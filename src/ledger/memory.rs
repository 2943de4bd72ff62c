use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rocket::tokio::sync::Mutex;

use crate::catalog::ElectionCatalog;
use crate::error::{Error, Result};
use crate::model::{
    common::{CandidateId, ElectionId, VoterId},
    transaction::VoteTransaction,
};

use super::{validate_ballot, VoteLedger};

/// Everything guarded by the ledger lock. The three parts only ever change
/// together.
#[derive(Debug, Default)]
struct LedgerState {
    log: Vec<VoteTransaction>,
    voted: HashSet<(VoterId, ElectionId)>,
    totals: HashMap<(ElectionId, CandidateId), u64>,
}

/// A [`VoteLedger`] held in process memory.
pub struct InMemoryLedger {
    catalog: Arc<dyn ElectionCatalog>,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(catalog: Arc<dyn ElectionCatalog>) -> Self {
        Self {
            catalog,
            state: Default::default(),
        }
    }
}

#[rocket::async_trait]
impl VoteLedger for InMemoryLedger {
    async fn has_voted(&self, voter_id: &VoterId, election_id: ElectionId) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.voted.contains(&(voter_id.clone(), election_id)))
    }

    async fn record_vote(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<VoteTransaction> {
        // Elections are immutable, so validating before taking the lock is sound.
        let validation =
            validate_ballot(&*self.catalog, election_id, candidate_id, Utc::now()).await;

        let mut state = self.state.lock().await;
        let key = (voter_id.clone(), election_id);
        if state.voted.contains(&key) {
            warn!("Rejected duplicate vote by {voter_id} in election {election_id}");
            return Err(Error::AlreadyVoted(election_id));
        }
        validation?;

        let sequence = state.log.len() as u64 + 1;
        let transaction =
            VoteTransaction::new(sequence, Utc::now(), voter_id.clone(), election_id, candidate_id);
        state.voted.insert(key);
        *state.totals.entry((election_id, candidate_id)).or_insert(0) += 1;
        state.log.push(transaction.clone());

        info!(
            "Recorded vote #{sequence} in election {election_id} ({})",
            transaction.hash
        );
        Ok(transaction)
    }

    async fn list_transactions(&self) -> Result<Vec<VoteTransaction>> {
        Ok(self.state.lock().await.log.clone())
    }

    async fn tally(&self, election_id: ElectionId) -> Result<HashMap<CandidateId, u64>> {
        let state = self.state.lock().await;
        Ok(state
            .totals
            .iter()
            .filter(|((election, _), _)| *election == election_id)
            .map(|((_, candidate), votes)| (*candidate, *votes))
            .collect())
    }
}
