use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::common::{CandidateId, ElectionId, VoterId};

/// Domain separation tag mixed into every transaction hash.
const HASH_DOMAIN: &[u8] = b"evote/vote-transaction/v1";

/// An immutable record of one cast vote.
///
/// The hash is a local integrity token over the record's own contents; it
/// makes tampering with a stored row detectable but claims nothing about
/// distributed consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTransaction {
    /// Position in the ledger, starting at 1 with no gaps.
    pub sequence: u64,
    /// Lowercase hex SHA-256, see [`VoteTransaction::compute_hash`].
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub voter_id: VoterId,
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
}

impl VoteTransaction {
    /// Create a transaction, deriving its hash.
    pub fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        voter_id: VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Self {
        let hash = Self::compute_hash(sequence, timestamp, &voter_id, election_id, candidate_id);
        Self {
            sequence,
            hash,
            timestamp,
            voter_id,
            election_id,
            candidate_id,
        }
    }

    /// Deterministically hash the given fields.
    ///
    /// Timestamps enter at millisecond precision so the hash survives a
    /// round trip through storage.
    pub fn compute_hash(
        sequence: u64,
        timestamp: DateTime<Utc>,
        voter_id: &VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> String {
        let voter = voter_id.as_str().as_bytes();
        let mut hasher = Sha256::new();
        hasher.update(HASH_DOMAIN);
        // Length prefix keeps the variable-length voter ID unambiguous.
        hasher.update((voter.len() as u64).to_le_bytes());
        hasher.update(voter);
        hasher.update(election_id.to_le_bytes());
        hasher.update(candidate_id.to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        hasher.update(timestamp.timestamp_millis().to_le_bytes());
        HEXLOWER.encode(&hasher.finalize())
    }

    /// Does the stored hash still match the contents?
    pub fn verify(&self) -> bool {
        self.hash
            == Self::compute_hash(
                self.sequence,
                self.timestamp,
                &self.voter_id,
                self.election_id,
                self.candidate_id,
            )
    }
}

/// Check an ordered transaction log for gaps and tampering.
///
/// Returns the sequence number of the first bad entry, if any.
pub fn first_invalid(log: &[VoteTransaction]) -> Option<u64> {
    log.iter()
        .zip(1u64..)
        .find(|(tx, expected)| tx.sequence != *expected || !tx.verify())
        .map(|(tx, _)| tx.sequence)
}
