use std::ops::Deref;

use mongodb::{bson::doc, options::IndexOptions, Collection, Database, IndexModel};

use crate::error::Result;
use crate::model::{election::Election, transaction::VoteTransaction};

use super::counter::Counter;
use super::CandidateTotal;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for VoteTransaction {
    const NAME: &'static str = "transactions";
}

impl MongoCollection for CandidateTotal {
    const NAME: &'static str = "candidate_totals";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<()> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // One vote per voter per election.
    let one_vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1})
        .options(unique.clone())
        .build();
    let sequence_index = IndexModel::builder()
        .keys(doc! {"sequence": 1})
        .options(unique.clone())
        .build();
    Coll::<VoteTransaction>::from_db(db)
        .create_indexes([one_vote_index, sequence_index], None)
        .await?;

    let totals_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .options(unique)
        .build();
    Coll::<CandidateTotal>::from_db(db)
        .create_index(totals_index, None)
        .await?;

    Ok(())
}
