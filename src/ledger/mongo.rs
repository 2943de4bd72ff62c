use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOptions, UpdateOptions},
    Client, Database,
};
use rocket::futures::TryStreamExt;

use crate::catalog::ElectionCatalog;
use crate::error::{Error, Result};
use crate::model::{
    common::{CandidateId, ElectionId, VoterId},
    mongodb::{
        is_duplicate_key_error, is_transient_transaction_error, CandidateTotal, Coll, Counter,
        VOTE_SEQUENCE_COUNTER_ID,
    },
    transaction::VoteTransaction,
};

use super::{validate_ballot, VoteLedger};

/// How many times a transaction aborted by a write conflict is re-run.
const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// A [`VoteLedger`] on MongoDB.
///
/// Relies on the unique `(voter_id, election_id)` index created by
/// [`ensure_indexes_exist`](crate::model::mongodb::ensure_indexes_exist), and
/// on a replica set for multi-document transactions.
pub struct MongoLedger {
    client: Client,
    catalog: Arc<dyn ElectionCatalog>,
    transactions: Coll<VoteTransaction>,
    totals: Coll<CandidateTotal>,
    counters: Coll<Counter>,
}

impl MongoLedger {
    pub fn new(client: Client, db: &Database, catalog: Arc<dyn ElectionCatalog>) -> Self {
        Self {
            client,
            catalog,
            transactions: Coll::from_db(db),
            totals: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }

    /// One attempt at the sequence bump, log insert and tally increment, all
    /// in one transaction.
    async fn try_record(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<VoteTransaction> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let sequence =
            Counter::next_in(&self.counters, VOTE_SEQUENCE_COUNTER_ID, &mut session).await?;
        let transaction =
            VoteTransaction::new(sequence, Utc::now(), voter_id.clone(), election_id, candidate_id);
        self.transactions
            .insert_one_with_session(&transaction, None, &mut session)
            .await?;

        let candidate_filter = doc! {
            "election_id": election_id,
            "candidate_id": candidate_id,
        };
        let upsert = UpdateOptions::builder().upsert(true).build();
        self.totals
            .update_one_with_session(
                candidate_filter,
                doc! { "$inc": { "votes": 1_i64 } },
                upsert,
                &mut session,
            )
            .await?;

        // Dropping the session on any earlier error aborts the transaction.
        session.commit_transaction().await?;
        Ok(transaction)
    }
}

fn unavailable(err: DbError) -> Error {
    error!("Vote ledger operation failed: {err}");
    Error::LedgerUnavailable(err.to_string())
}

#[rocket::async_trait]
impl VoteLedger for MongoLedger {
    async fn has_voted(&self, voter_id: &VoterId, election_id: ElectionId) -> Result<bool> {
        let filter = doc! {
            "voter_id": voter_id.as_str(),
            "election_id": election_id,
        };
        let count = self
            .transactions
            .count_documents(filter, None)
            .await
            .map_err(unavailable)?;
        Ok(count > 0)
    }

    async fn record_vote(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<VoteTransaction> {
        let validation =
            validate_ballot(&*self.catalog, election_id, candidate_id, Utc::now()).await;
        // Report a repeat as such even if the election has closed since.
        if self.has_voted(voter_id, election_id).await? {
            warn!("Rejected duplicate vote by {voter_id} in election {election_id}");
            return Err(Error::AlreadyVoted(election_id));
        }
        validation?;

        let mut attempt = 1;
        loop {
            match self.try_record(voter_id, election_id, candidate_id).await {
                Ok(transaction) => {
                    info!(
                        "Recorded vote #{} in election {election_id} ({})",
                        transaction.sequence, transaction.hash
                    );
                    return Ok(transaction);
                }
                Err(Error::Db(err)) if is_duplicate_key_error(&err) => {
                    warn!("Rejected duplicate vote by {voter_id} in election {election_id}");
                    return Err(Error::AlreadyVoted(election_id));
                }
                Err(Error::Db(err))
                    if is_transient_transaction_error(&err) && attempt < MAX_TRANSACTION_ATTEMPTS =>
                {
                    debug!("Retrying vote transaction after conflict (attempt {attempt}): {err}");
                    attempt += 1;
                }
                Err(Error::Db(err)) => return Err(unavailable(err)),
                Err(err) => return Err(err),
            }
        }
    }

    async fn list_transactions(&self) -> Result<Vec<VoteTransaction>> {
        let options = FindOptions::builder().sort(doc! { "sequence": 1 }).build();
        self.transactions
            .find(None, options)
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)
    }

    async fn tally(&self, election_id: ElectionId) -> Result<HashMap<CandidateId, u64>> {
        self.totals
            .find(doc! { "election_id": election_id }, None)
            .await
            .map_err(unavailable)?
            .map_ok(|total| (total.candidate_id, total.votes))
            .try_collect()
            .await
            .map_err(unavailable)
    }
}
