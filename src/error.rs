use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::logging::RequestId;
use crate::model::{
    common::{CandidateId, ElectionId},
    session::Factor,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Every way the voting core can fail.
///
/// Each variant is a tagged outcome the presentation layer can render; see
/// [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Election {0} does not exist")]
    UnknownElection(ElectionId),
    #[error("Election {0} is not open for voting")]
    ElectionNotActive(ElectionId),
    #[error("Candidate {candidate_id} does not stand in election {election_id}")]
    InvalidCandidate {
        election_id: ElectionId,
        candidate_id: CandidateId,
    },
    #[error("Cannot {operation} while the workflow is {state}")]
    InvalidWorkflowState {
        operation: &'static str,
        state: String,
    },
    #[error("Voter has already voted in election {0}")]
    AlreadyVoted(ElectionId),
    #[error("{factor} verification failed, {attempts_remaining} attempt(s) remaining")]
    VerificationFailed {
        factor: Factor,
        attempts_remaining: u32,
    },
    #[error("No more {0} verification attempts allowed")]
    AttemptsExhausted(Factor),
    #[error("No face reference is enrolled for this voter")]
    NoReferenceEnrolled,
    #[error("A new code can be requested in {retry_after} seconds")]
    OtpCooldown { retry_after: u64 },
    #[error("Could not deliver the one-time code: {0}")]
    DeliveryFailed(String),
    #[error("Election catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("Vote ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl Error {
    /// Convenience constructor for [`Error::InvalidWorkflowState`].
    pub fn out_of_order(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidWorkflowState {
            operation,
            state: state.to_string(),
        }
    }

    /// Stable tag for this kind of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::UnknownElection(_) => "UnknownElection",
            Self::ElectionNotActive(_) => "ElectionNotActive",
            Self::InvalidCandidate { .. } => "InvalidCandidate",
            Self::InvalidWorkflowState { .. } => "InvalidWorkflowState",
            Self::AlreadyVoted(_) => "AlreadyVoted",
            Self::VerificationFailed { .. } => "VerificationFailed",
            Self::AttemptsExhausted(_) => "AttemptsExhausted",
            Self::NoReferenceEnrolled => "NoReferenceEnrolled",
            Self::OtpCooldown { .. } => "OtpCooldown",
            Self::DeliveryFailed(_) => "DeliveryFailed",
            Self::CatalogUnavailable(_) => "CatalogUnavailable",
            Self::LedgerUnavailable(_) => "LedgerUnavailable",
            Self::Unauthorized(_) | Self::Jwt(_) => "Unauthorized",
            Self::Config(_) => "Config",
            Self::Internal(_) | Self::Db(_) => "Internal",
        }
    }

    /// Transient infrastructure failures, which are safe to retry as-is.
    ///
    /// `AlreadyVoted` in particular is terminal and must never be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CatalogUnavailable(_) | Self::LedgerUnavailable(_)
        )
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) | Self::UnknownElection(_) => Status::NotFound,
            Self::AlreadyVoted(_) | Self::InvalidWorkflowState { .. } => Status::Conflict,
            Self::ElectionNotActive(_)
            | Self::InvalidCandidate { .. }
            | Self::NoReferenceEnrolled => Status::UnprocessableEntity,
            Self::VerificationFailed { .. } | Self::Unauthorized(_) | Self::Jwt(_) => {
                Status::Unauthorized
            }
            Self::AttemptsExhausted(_) | Self::OtpCooldown { .. } => Status::TooManyRequests,
            Self::CatalogUnavailable(_) | Self::LedgerUnavailable(_) => Status::ServiceUnavailable,
            Self::DeliveryFailed(_) => Status::BadGateway,
            Self::Config(_) | Self::Internal(_) | Self::Db(_) => Status::InternalServerError,
        }
    }
}

/// JSON body sent alongside an error status.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.class() == StatusClass::ServerError {
            error!("req{} failed: {self}", RequestId::of(req));
        } else {
            debug!("req{} rejected: {self}", RequestId::of(req));
        }
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).respond_to(req)
    }
}
