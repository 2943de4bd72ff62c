use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Coll;

/// ID of the counter that numbers vote transactions.
pub const VOTE_SEQUENCE_COUNTER_ID: &str = "vote_sequence";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u64,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given ID,
    /// as part of the session's transaction.
    pub async fn next_in(
        counters: &Coll<Counter>,
        id: &str,
        session: &mut ClientSession,
    ) -> Result<u64> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let counter = counters
            .find_one_and_update_with_session(doc! { "_id": id }, update, options, session)
            .await?
            .ok_or_else(|| Error::Internal(format!("missing counter '{id}'")))?;
        Ok(counter.next)
    }
}

/// Ensure the vote sequence counter exists, starting at 1.
///
/// This operation is idempotent and never resets an existing counter.
pub async fn ensure_vote_sequence_counter_exists(counters: &Coll<Counter>) -> Result<()> {
    let options = UpdateOptions::builder().upsert(true).build();
    counters
        .update_one(
            doc! { "_id": VOTE_SEQUENCE_COUNTER_ID },
            doc! { "$setOnInsert": { "next": 1_i64 } },
            options,
        )
        .await?;
    Ok(())
}
