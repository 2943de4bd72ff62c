use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateId, ElectionId, VoterId},
    session::{Factor, FactorStatus, VerificationStep},
    transaction::VoteTransaction,
};
use crate::workflow::{VotingWorkflow, WorkflowState};

/// What the presentation layer needs to render a voter's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub voter_id: VoterId,
    pub election_id: ElectionId,
    /// Name of the top-level state.
    pub state: String,
    /// The workflow is confirmed or rejected and accepts no further steps.
    pub finished: bool,
    pub verification: VerificationView,
    pub selected_election: Option<ElectionId>,
    pub selected_candidate: Option<CandidateId>,
    /// Present once the vote is confirmed.
    pub transaction: Option<VoteTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationView {
    pub step: VerificationStep,
    pub face: FactorStatus,
    pub otp: FactorStatus,
    pub face_attempts_remaining: u32,
    pub otp_attempts_remaining: u32,
}

impl From<&VotingWorkflow> for WorkflowView {
    fn from(workflow: &VotingWorkflow) -> Self {
        let session = workflow.session();
        let state = workflow.state();
        let (selected_election, selected_candidate, transaction) = match state {
            WorkflowState::AwaitingVerification | WorkflowState::AwaitingElectionChoice => {
                (None, None, None)
            }
            WorkflowState::AwaitingCandidateChoice { election } => (Some(election.id), None, None),
            WorkflowState::CandidateChosen { election, candidate }
            | WorkflowState::Casting { election, candidate } => {
                (Some(election.id), Some(*candidate), None)
            }
            WorkflowState::Confirmed(tx) => {
                (Some(tx.election_id), Some(tx.candidate_id), Some(tx.clone()))
            }
            WorkflowState::Rejected(_) => (Some(session.key().election_id), None, None),
        };
        Self {
            voter_id: session.key().voter_id.clone(),
            election_id: session.key().election_id,
            state: state.name().to_string(),
            finished: state.is_terminal(),
            verification: VerificationView {
                step: session.step(),
                face: session.status(Factor::Face),
                otp: session.status(Factor::Otp),
                face_attempts_remaining: session.attempts_remaining(Factor::Face),
                otp_attempts_remaining: session.attempts_remaining(Factor::Otp),
            },
            selected_election,
            selected_candidate,
            transaction,
        }
    }
}
