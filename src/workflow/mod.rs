//! The vote-casting orchestrator.
//!
//! ```text
//! AwaitingVerification -> AwaitingElectionChoice -> AwaitingCandidateChoice
//!     -> CandidateChosen -> Casting -> Confirmed | Rejected
//! ```
//!
//! `AwaitingVerification` wraps the [`VerificationSession`] gate. Each
//! operation is only accepted in the state that permits it; anything else
//! fails with [`Error::InvalidWorkflowState`] and changes nothing.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::catalog::ElectionCatalog;
use crate::error::{Error, Result};
use crate::ledger::VoteLedger;
use crate::model::{
    common::{CandidateId, ElectionId, SessionKey},
    election::Election,
    face::{FaceMatcher, FaceSample},
    otp::{Code, OtpChannel},
    session::{
        AttemptLimits, FaceResult, Factor, OtpResult, SessionEvent, VerificationSession,
        VerificationStep,
    },
    transaction::VoteTransaction,
};
use crate::services::Services;

mod registry;

pub use registry::WorkflowRegistry;

/// Why a workflow ended without a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyVoted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    AwaitingVerification,
    AwaitingElectionChoice,
    AwaitingCandidateChoice {
        election: Election,
    },
    CandidateChosen {
        election: Election,
        candidate: CandidateId,
    },
    /// The ledger call is in flight.
    Casting {
        election: Election,
        candidate: CandidateId,
    },
    Confirmed(VoteTransaction),
    Rejected(Rejection),
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingVerification => "AwaitingVerification",
            Self::AwaitingElectionChoice => "AwaitingElectionChoice",
            Self::AwaitingCandidateChoice { .. } => "AwaitingCandidateChoice",
            Self::CandidateChosen { .. } => "CandidateChosen",
            Self::Casting { .. } => "Casting",
            Self::Confirmed(_) => "Confirmed",
            Self::Rejected(_) => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::Rejected(_))
    }
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingVerification => f.write_str("awaiting verification"),
            Self::AwaitingElectionChoice => f.write_str("awaiting an election choice"),
            Self::AwaitingCandidateChoice { election } => {
                write!(f, "awaiting a candidate choice in election {}", election.id)
            }
            Self::CandidateChosen { election, candidate } => write!(
                f,
                "ready to cast for candidate {candidate} in election {}",
                election.id
            ),
            Self::Casting { .. } => f.write_str("casting"),
            Self::Confirmed(tx) => write!(f, "confirmed as vote #{}", tx.sequence),
            Self::Rejected(Rejection::AlreadyVoted) => f.write_str("rejected (already voted)"),
        }
    }
}

/// Takes one voter through verification and casts at most one vote for
/// them in one election.
///
/// Collaborators are injected at construction. The ledger, not this type,
/// enforces one vote per voter per election; the workflow merely gates the
/// call to it.
pub struct VotingWorkflow {
    catalog: Arc<dyn ElectionCatalog>,
    ledger: Arc<dyn VoteLedger>,
    faces: Arc<dyn FaceMatcher>,
    otp: Arc<dyn OtpChannel>,
    session: VerificationSession,
    session_ttl: Duration,
    state: WorkflowState,
    last_activity: DateTime<Utc>,
}

impl VotingWorkflow {
    /// Start a workflow for the voter and election in `key`.
    pub fn new(
        services: &Services,
        key: SessionKey,
        limits: AttemptLimits,
        session_ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            catalog: services.catalog.clone(),
            ledger: services.ledger.clone(),
            faces: services.faces.clone(),
            otp: services.otp.clone(),
            session: VerificationSession::new(key, limits, now),
            session_ttl,
            state: WorkflowState::AwaitingVerification,
            last_activity: now,
        }
    }

    pub fn key(&self) -> &SessionKey {
        self.session.key()
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Submit a captured face sample to the face-match evaluator.
    pub async fn verify_face(&mut self, sample: &FaceSample) -> Result<()> {
        self.begin_verification("submit a face sample")?;
        self.session.apply(SessionEvent::FaceSubmitted, Utc::now())?;
        self.touch();

        let voter_id = self.key().voter_id.clone();
        let outcome = match self.faces.evaluate(&voter_id, sample).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.session.apply(SessionEvent::Abandoned, Utc::now())?;
                return Err(err);
            }
        };

        let Some(result) = outcome.result() else {
            self.session.apply(SessionEvent::Abandoned, Utc::now())?;
            warn!("No face reference enrolled for voter {voter_id}");
            return Err(Error::NoReferenceEnrolled);
        };
        self.session.apply(SessionEvent::FaceEvaluated(result), Utc::now())?;
        match result {
            FaceResult::Matched => Ok(()),
            FaceResult::Mismatched => Err(self.factor_failed(Factor::Face)),
        }
    }

    /// Ask the one-time-code channel to send the voter a code.
    pub async fn request_otp(&mut self) -> Result<()> {
        self.begin_verification("request a one-time code")?;
        if !matches!(
            self.session.step(),
            VerificationStep::FacePassed | VerificationStep::OtpVerifying
        ) {
            return Err(Error::out_of_order(
                "request a one-time code",
                self.session.step(),
            ));
        }
        if self.session.attempts_remaining(Factor::Otp) == 0 {
            return Err(Error::AttemptsExhausted(Factor::Otp));
        }
        self.touch();
        self.otp.issue(self.session.key()).await
    }

    /// Submit the code the voter received.
    pub async fn submit_otp(&mut self, code: &Code) -> Result<()> {
        self.begin_verification("submit a one-time code")?;
        self.session.apply(SessionEvent::OtpSubmitted, Utc::now())?;
        self.touch();

        let result = match self.otp.check(self.session.key(), code).await {
            Ok(result) => result,
            Err(err) => {
                self.session.apply(SessionEvent::Abandoned, Utc::now())?;
                return Err(err);
            }
        };
        self.session.apply(SessionEvent::OtpEvaluated(result), Utc::now())?;
        match result {
            OtpResult::Correct => {
                info!("Voter {} verified", self.key());
                self.state = WorkflowState::AwaitingElectionChoice;
                Ok(())
            }
            OtpResult::Incorrect => Err(self.factor_failed(Factor::Otp)),
        }
    }

    /// Choose the election to vote in. Verification is bound to one
    /// election, so only that election can be chosen.
    pub async fn select_election(&mut self, election_id: ElectionId) -> Result<()> {
        const OPERATION: &str = "select an election";
        if self.state != WorkflowState::AwaitingElectionChoice || !self.session.is_verified() {
            return Err(Error::out_of_order(OPERATION, &self.state));
        }
        if election_id != self.key().election_id {
            return Err(Error::out_of_order(
                OPERATION,
                format_args!("verified for election {}", self.key().election_id),
            ));
        }

        self.touch();

        let election = self.catalog.get_election(election_id).await?;
        if !election.is_active() {
            return Err(Error::ElectionNotActive(election_id));
        }
        self.state = WorkflowState::AwaitingCandidateChoice { election };
        Ok(())
    }

    /// Choose a candidate of the selected election.
    pub fn select_candidate(&mut self, candidate_id: CandidateId) -> Result<()> {
        let WorkflowState::AwaitingCandidateChoice { election } = &self.state else {
            return Err(Error::out_of_order("select a candidate", &self.state));
        };
        if !election.has_candidate(candidate_id) {
            return Err(Error::InvalidCandidate {
                election_id: election.id,
                candidate_id,
            });
        }
        self.state = WorkflowState::CandidateChosen {
            election: election.clone(),
            candidate: candidate_id,
        };
        self.touch();
        Ok(())
    }

    /// Cast the chosen vote.
    ///
    /// `AlreadyVoted` ends the workflow in `Rejected`, and is what every
    /// later cast on a finished workflow reports. Any other failure leaves
    /// the choice in place so the cast can be retried.
    pub async fn cast_vote(&mut self) -> Result<VoteTransaction> {
        if self.state.is_terminal() {
            return Err(Error::AlreadyVoted(self.key().election_id));
        }
        let previous = std::mem::replace(&mut self.state, WorkflowState::AwaitingVerification);
        let (election, candidate) = match previous {
            WorkflowState::CandidateChosen {
                election,
                candidate,
            } => (election, candidate),
            other => {
                let err = Error::out_of_order("cast a vote", &other);
                self.state = other;
                return Err(err);
            }
        };
        self.touch();
        let election_id = election.id;
        let voter_id = self.key().voter_id.clone();
        self.state = WorkflowState::Casting {
            election: election.clone(),
            candidate,
        };

        // Cheap early answer; the ledger still has the final word below.
        match self.ledger.has_voted(&voter_id, election_id).await {
            Ok(true) => {
                self.state = WorkflowState::Rejected(Rejection::AlreadyVoted);
                return Err(Error::AlreadyVoted(election_id));
            }
            Ok(false) => {}
            Err(err) => debug!("Skipping early duplicate check for {}: {err}", self.key()),
        }

        match self.ledger.record_vote(&voter_id, election_id, candidate).await {
            Ok(transaction) => {
                self.state = WorkflowState::Confirmed(transaction.clone());
                Ok(transaction)
            }
            Err(Error::AlreadyVoted(id)) => {
                self.state = WorkflowState::Rejected(Rejection::AlreadyVoted);
                Err(Error::AlreadyVoted(id))
            }
            Err(err) => {
                self.state = WorkflowState::CandidateChosen {
                    election,
                    candidate,
                };
                Err(err)
            }
        }
    }

    /// Common entry to the verification operations: check the top-level
    /// state and restart a session that sat idle too long.
    fn begin_verification(&mut self, operation: &'static str) -> Result<()> {
        if self.state != WorkflowState::AwaitingVerification {
            return Err(Error::out_of_order(operation, &self.state));
        }
        let now = Utc::now();
        if self.session.is_stale(now, self.session_ttl) {
            self.session.restart(now);
        }
        Ok(())
    }

    fn factor_failed(&self, factor: Factor) -> Error {
        let attempts_remaining = self.session.attempts_remaining(factor);
        warn!(
            "{factor} verification failed for {} ({attempts_remaining} attempt(s) left)",
            self.key()
        );
        Error::VerificationFailed {
            factor,
            attempts_remaining,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::services::Fixtures;

    async fn verify(fixtures: &Fixtures, workflow: &mut VotingWorkflow) {
        workflow.verify_face(&FaceSample::matching()).await.unwrap();
        workflow.request_otp().await.unwrap();
        let code = fixtures.delivery.last_code(workflow.key()).unwrap();
        workflow.submit_otp(&code).await.unwrap();
        assert!(workflow.session().is_verified());
    }

    async fn ready_to_cast(
        fixtures: &Fixtures,
        voter: &str,
        candidate: CandidateId,
    ) -> VotingWorkflow {
        let mut workflow = fixtures.workflow(voter, 42);
        verify(fixtures, &mut workflow).await;
        workflow.select_election(42).await.unwrap();
        workflow.select_candidate(candidate).unwrap();
        workflow
    }

    #[rocket::async_test]
    async fn verified_voter_casts_one_vote() {
        let fixtures = Fixtures::new().await;
        let mut workflow = ready_to_cast(&fixtures, "v1", 101).await;

        let tx = workflow.cast_vote().await.unwrap();
        assert_eq!(tx.voter_id.as_str(), "v1");
        assert_eq!(tx.election_id, 42);
        assert_eq!(tx.candidate_id, 101);
        assert_eq!(workflow.state(), &WorkflowState::Confirmed(tx.clone()));
        assert_eq!(
            fixtures.services.ledger.tally(42).await.unwrap(),
            HashMap::from([(101, 1)])
        );

        // Casting again reports the duplicate and keeps the receipt.
        assert!(matches!(
            workflow.cast_vote().await,
            Err(Error::AlreadyVoted(42))
        ));
        assert_eq!(workflow.state(), &WorkflowState::Confirmed(tx.clone()));
        assert_eq!(
            fixtures.services.ledger.list_transactions().await.unwrap(),
            vec![tx]
        );
    }

    #[rocket::async_test]
    async fn second_workflow_for_same_voter_is_rejected() {
        let fixtures = Fixtures::new().await;
        let mut first = ready_to_cast(&fixtures, "v1", 101).await;
        first.cast_vote().await.unwrap();

        let mut second = ready_to_cast(&fixtures, "v1", 102).await;
        assert!(matches!(second.cast_vote().await, Err(Error::AlreadyVoted(42))));
        assert_eq!(second.state(), &WorkflowState::Rejected(Rejection::AlreadyVoted));
        assert!(matches!(second.cast_vote().await, Err(Error::AlreadyVoted(42))));
        assert_eq!(second.state(), &WorkflowState::Rejected(Rejection::AlreadyVoted));

        let tally = fixtures.services.ledger.tally(42).await.unwrap();
        assert_eq!(tally, HashMap::from([(101, 1)]));
        assert_eq!(fixtures.services.ledger.list_transactions().await.unwrap().len(), 1);
    }

    #[test]
    fn racing_workflows_cast_exactly_once() {
        let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fixtures = Fixtures::new().await;
            let mut a = ready_to_cast(&fixtures, "v2", 101).await;
            let mut b = ready_to_cast(&fixtures, "v2", 102).await;

            let a = rocket::tokio::spawn(async move { a.cast_vote().await });
            let b = rocket::tokio::spawn(async move { b.cast_vote().await });
            let results = [a.await.unwrap(), b.await.unwrap()];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert_eq!(
                results
                    .iter()
                    .filter(|r| matches!(r, Err(Error::AlreadyVoted(42))))
                    .count(),
                1
            );
            let tally = fixtures.services.ledger.tally(42).await.unwrap();
            assert_eq!(tally.values().sum::<u64>(), 1);
        });
    }

    #[rocket::async_test]
    async fn cast_is_gated_on_verification() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        assert!(matches!(
            workflow.cast_vote().await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert_eq!(workflow.state(), &WorkflowState::AwaitingVerification);

        // Half way through the gate is still not enough.
        workflow.verify_face(&FaceSample::matching()).await.unwrap();
        assert!(matches!(
            workflow.select_election(42).await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert!(matches!(
            workflow.cast_vote().await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert!(fixtures.services.ledger.list_transactions().await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn rejected_calls_leave_activity_untouched() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        let before = workflow.last_activity();
        rocket::tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(workflow.select_election(42).await.is_err());
        assert!(workflow.select_candidate(101).is_err());
        assert!(workflow.cast_vote().await.is_err());
        assert!(workflow.request_otp().await.is_err());
        assert_eq!(workflow.last_activity(), before);
        assert_eq!(workflow.state(), &WorkflowState::AwaitingVerification);

        workflow.verify_face(&FaceSample::matching()).await.unwrap();
        assert!(workflow.last_activity() > before);
    }

    #[rocket::async_test]
    async fn candidate_before_election_is_out_of_order() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        verify(&fixtures, &mut workflow).await;

        assert!(matches!(
            workflow.select_candidate(101),
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert_eq!(workflow.state(), &WorkflowState::AwaitingElectionChoice);
    }

    #[rocket::async_test]
    async fn repeated_face_mismatch_never_reaches_the_ledger() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);

        for remaining in [2, 1, 0] {
            match workflow.verify_face(&FaceSample::stranger()).await {
                Err(Error::VerificationFailed {
                    factor: Factor::Face,
                    attempts_remaining,
                }) => assert_eq!(attempts_remaining, remaining),
                other => panic!("unexpected outcome {other:?}"),
            }
            assert_eq!(workflow.session().step(), VerificationStep::Start);
        }
        assert!(matches!(
            workflow.verify_face(&FaceSample::matching()).await,
            Err(Error::AttemptsExhausted(Factor::Face))
        ));
        assert!(!workflow.session().is_verified());
        assert!(matches!(
            workflow.request_otp().await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert!(matches!(
            workflow.cast_vote().await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert!(fixtures.services.ledger.list_transactions().await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn missing_face_reference_fails_fast() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("unenrolled", 42);
        assert!(matches!(
            workflow.verify_face(&FaceSample::matching()).await,
            Err(Error::NoReferenceEnrolled)
        ));
        assert_eq!(workflow.session().step(), VerificationStep::Start);
        assert_eq!(workflow.session().failures(Factor::Face), 0);
    }

    #[rocket::async_test]
    async fn wrong_code_can_be_retried() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        workflow.verify_face(&FaceSample::matching()).await.unwrap();

        workflow.request_otp().await.unwrap();
        let code = fixtures.delivery.last_code(workflow.key()).unwrap();
        assert!(matches!(
            workflow.submit_otp(&code.wrong()).await,
            Err(Error::VerificationFailed {
                factor: Factor::Otp,
                attempts_remaining: 2
            })
        ));
        assert_eq!(workflow.session().step(), VerificationStep::FacePassed);

        workflow.submit_otp(&code).await.unwrap();
        assert_eq!(workflow.state(), &WorkflowState::AwaitingElectionChoice);
    }

    #[rocket::async_test]
    async fn otp_cannot_precede_face() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        assert!(matches!(
            workflow.request_otp().await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert!(matches!(
            workflow.submit_otp(&Code::random()).await,
            Err(Error::InvalidWorkflowState { .. })
        ));
        assert_eq!(fixtures.delivery.sent_count(), 0);
    }

    #[rocket::async_test]
    async fn election_choice_is_checked() {
        let fixtures = Fixtures::new().await;

        let mut other = fixtures.workflow("v1", 43);
        verify(&fixtures, &mut other).await;
        assert!(matches!(
            other.select_election(43).await,
            Err(Error::UnknownElection(43))
        ));

        let mut closed = fixtures.workflow("v1", 7);
        verify(&fixtures, &mut closed).await;
        assert!(matches!(
            closed.select_election(7).await,
            Err(Error::ElectionNotActive(7))
        ));
        assert_eq!(closed.state(), &WorkflowState::AwaitingElectionChoice);

        let mut mismatched = fixtures.workflow("v1", 42);
        verify(&fixtures, &mut mismatched).await;
        assert!(matches!(
            mismatched.select_election(7).await,
            Err(Error::InvalidWorkflowState { .. })
        ));
    }

    #[rocket::async_test]
    async fn foreign_candidate_is_invalid() {
        let fixtures = Fixtures::new().await;
        let mut workflow = fixtures.workflow("v1", 42);
        verify(&fixtures, &mut workflow).await;
        workflow.select_election(42).await.unwrap();
        assert!(matches!(
            workflow.select_candidate(201),
            Err(Error::InvalidCandidate {
                election_id: 42,
                candidate_id: 201
            })
        ));
        assert_eq!(workflow.state().name(), "AwaitingCandidateChoice");
    }

    #[rocket::async_test]
    async fn transient_ledger_failure_keeps_choice() {
        let fixtures = Fixtures::with_flaky_ledger(1).await;
        let mut workflow = ready_to_cast(&fixtures, "v1", 102).await;

        let err = workflow.cast_vote().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(workflow.state().name(), "CandidateChosen");

        let tx = workflow.cast_vote().await.unwrap();
        assert_eq!(tx.candidate_id, 102);
        assert_eq!(fixtures.services.ledger.list_transactions().await.unwrap().len(), 1);
    }
}
