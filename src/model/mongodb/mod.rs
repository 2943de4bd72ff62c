use serde::{Deserialize, Serialize};

use crate::model::common::{CandidateId, ElectionId};

mod collection;
mod counter;
mod errors;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{ensure_vote_sequence_counter_exists, Counter, VOTE_SEQUENCE_COUNTER_ID};
pub use errors::{is_duplicate_key_error, is_transient_transaction_error};

/// Running vote count for one candidate, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTotal {
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    pub votes: u64,
}
