//! The two-factor verification gate.
//!
//! A [`VerificationSession`] walks one voter through a face match followed by
//! a one-time code for one election:
//!
//! ```text
//! Start -> FaceVerifying -> FacePassed -> OtpVerifying -> Verified
//!   ^           |               ^              |
//!   +-----------+ mismatch      +--------------+ incorrect
//! ```
//!
//! The `*Verifying` steps last while a collaborator is evaluating a
//! submission. Only the collaborators' outcomes move a session forward, and
//! every move goes through the fixed table in [`transition`].

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::common::SessionKey;

/// One of the two independent identity checks.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Factor {
    Face,
    Otp,
}

impl Display for Factor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Face => f.write_str("face"),
            Self::Otp => f.write_str("one-time code"),
        }
    }
}

/// Progress through the gate. Declared in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerificationStep {
    Start,
    FaceVerifying,
    FacePassed,
    OtpVerifying,
    Verified,
}

impl Display for VerificationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "awaiting a face sample",
            Self::FaceVerifying => "verifying the face sample",
            Self::FacePassed => "awaiting a one-time code",
            Self::OtpVerifying => "verifying the one-time code",
            Self::Verified => "verified",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorStatus {
    Pending,
    Verified,
    Failed,
}

/// Outcome reported by the face-match evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceResult {
    Matched,
    Mismatched,
}

/// Outcome reported by the one-time-code channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtpResult {
    Correct,
    Incorrect,
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A face sample was handed to the evaluator.
    FaceSubmitted,
    FaceEvaluated(FaceResult),
    /// A code was handed to the one-time-code channel.
    OtpSubmitted,
    OtpEvaluated(OtpResult),
    /// The evaluation in flight produced no verdict; go back and wait for a
    /// new submission without counting an attempt.
    Abandoned,
}

/// The fixed transition table. `None` means the event is not accepted in
/// that step.
pub fn transition(step: VerificationStep, event: SessionEvent) -> Option<VerificationStep> {
    use SessionEvent as E;
    use VerificationStep as S;

    match (step, event) {
        // Re-submitting while verifying replaces an evaluation the caller gave up on.
        (S::Start | S::FaceVerifying, E::FaceSubmitted) => Some(S::FaceVerifying),
        (S::FaceVerifying, E::FaceEvaluated(FaceResult::Matched)) => Some(S::FacePassed),
        (S::FaceVerifying, E::FaceEvaluated(FaceResult::Mismatched)) => Some(S::Start),
        (S::FaceVerifying, E::Abandoned) => Some(S::Start),
        (S::FacePassed | S::OtpVerifying, E::OtpSubmitted) => Some(S::OtpVerifying),
        (S::OtpVerifying, E::OtpEvaluated(OtpResult::Correct)) => Some(S::Verified),
        (S::OtpVerifying, E::OtpEvaluated(OtpResult::Incorrect)) => Some(S::FacePassed),
        (S::OtpVerifying, E::Abandoned) => Some(S::FacePassed),
        _ => None,
    }
}

/// How many failed attempts each factor tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLimits {
    pub face: u32,
    pub otp: u32,
}

impl AttemptLimits {
    fn of(&self, factor: Factor) -> u32 {
        match factor {
            Factor::Face => self.face,
            Factor::Otp => self.otp,
        }
    }
}

impl Default for AttemptLimits {
    fn default() -> Self {
        Self { face: 3, otp: 3 }
    }
}

/// Per-voter-per-election progress through the verification gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSession {
    key: SessionKey,
    step: VerificationStep,
    face_status: FactorStatus,
    otp_status: FactorStatus,
    /// Failed attempts so far.
    face_failures: u32,
    otp_failures: u32,
    limits: AttemptLimits,
    created_at: DateTime<Utc>,
    last_update: DateTime<Utc>,
}

impl VerificationSession {
    pub fn new(key: SessionKey, limits: AttemptLimits, now: DateTime<Utc>) -> Self {
        Self {
            key,
            step: VerificationStep::Start,
            face_status: FactorStatus::Pending,
            otp_status: FactorStatus::Pending,
            face_failures: 0,
            otp_failures: 0,
            limits,
            created_at: now,
            last_update: now,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn step(&self) -> VerificationStep {
        self.step
    }

    pub fn status(&self, factor: Factor) -> FactorStatus {
        match factor {
            Factor::Face => self.face_status,
            Factor::Otp => self.otp_status,
        }
    }

    pub fn failures(&self, factor: Factor) -> u32 {
        match factor {
            Factor::Face => self.face_failures,
            Factor::Otp => self.otp_failures,
        }
    }

    pub fn attempts_remaining(&self, factor: Factor) -> u32 {
        self.limits.of(factor).saturating_sub(self.failures(factor))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Both factors passed. This is the only thing the workflow checks before
    /// letting a vote through.
    pub fn is_verified(&self) -> bool {
        self.step == VerificationStep::Verified
            && self.face_status == FactorStatus::Verified
            && self.otp_status == FactorStatus::Verified
    }

    /// Has the session sat below `Verified` for longer than `ttl`?
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.step != VerificationStep::Verified && now - self.last_update > ttl
    }

    /// Send an unverified session back to `Start`.
    ///
    /// Failure counts survive, so expiry cannot be used to reset the
    /// attempt bound.
    pub fn restart(&mut self, now: DateTime<Utc>) {
        if self.step == VerificationStep::Verified {
            return;
        }
        debug!("Session {} restarted from {:?}", self.key, self.step);
        self.step = VerificationStep::Start;
        self.face_status = FactorStatus::Pending;
        self.otp_status = FactorStatus::Pending;
        self.last_update = now;
    }

    /// Feed one event through the transition table, updating factor
    /// statuses and counters on the way.
    ///
    /// Out-of-table events and submissions for an exhausted factor are
    /// rejected without touching the session.
    pub fn apply(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Result<VerificationStep> {
        let next = transition(self.step, event)
            .ok_or_else(|| Error::out_of_order(event_name(event), self.step))?;

        match event {
            SessionEvent::FaceSubmitted => {
                self.ensure_attempts_left(Factor::Face)?;
                self.face_status = FactorStatus::Pending;
            }
            SessionEvent::OtpSubmitted => {
                self.ensure_attempts_left(Factor::Otp)?;
                self.otp_status = FactorStatus::Pending;
            }
            SessionEvent::FaceEvaluated(FaceResult::Matched) => {
                self.face_status = FactorStatus::Verified;
            }
            SessionEvent::FaceEvaluated(FaceResult::Mismatched) => {
                self.face_status = FactorStatus::Failed;
                self.face_failures += 1;
            }
            SessionEvent::OtpEvaluated(OtpResult::Correct) => {
                self.otp_status = FactorStatus::Verified;
            }
            SessionEvent::OtpEvaluated(OtpResult::Incorrect) => {
                self.otp_status = FactorStatus::Failed;
                self.otp_failures += 1;
            }
            SessionEvent::Abandoned => match self.step {
                VerificationStep::FaceVerifying => self.face_status = FactorStatus::Failed,
                _ => self.otp_status = FactorStatus::Failed,
            },
        }

        debug!("Session {}: {:?} --{:?}--> {:?}", self.key, self.step, event, next);
        self.step = next;
        self.last_update = now;
        Ok(next)
    }

    fn ensure_attempts_left(&self, factor: Factor) -> Result<()> {
        if self.attempts_remaining(factor) == 0 {
            warn!("Session {}: {factor} attempts exhausted", self.key);
            return Err(Error::AttemptsExhausted(factor));
        }
        Ok(())
    }
}

fn event_name(event: SessionEvent) -> &'static str {
    match event {
        SessionEvent::FaceSubmitted => "submit a face sample",
        SessionEvent::FaceEvaluated(_) => "record a face verdict",
        SessionEvent::OtpSubmitted => "submit a one-time code",
        SessionEvent::OtpEvaluated(_) => "record a one-time code verdict",
        SessionEvent::Abandoned => "abandon a verification",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::common::VoterId;

    fn session() -> VerificationSession {
        VerificationSession::new(
            SessionKey::new(VoterId::from("v1"), 42),
            AttemptLimits::default(),
            Utc::now(),
        )
    }

    fn pass_face(session: &mut VerificationSession) {
        let now = Utc::now();
        session.apply(SessionEvent::FaceSubmitted, now).unwrap();
        session
            .apply(SessionEvent::FaceEvaluated(FaceResult::Matched), now)
            .unwrap();
    }

    #[test]
    fn happy_path_reaches_verified() {
        let mut session = session();
        let now = Utc::now();
        assert_eq!(session.step(), VerificationStep::Start);

        assert_eq!(
            session.apply(SessionEvent::FaceSubmitted, now).unwrap(),
            VerificationStep::FaceVerifying
        );
        assert_eq!(
            session
                .apply(SessionEvent::FaceEvaluated(FaceResult::Matched), now)
                .unwrap(),
            VerificationStep::FacePassed
        );
        assert_eq!(session.status(Factor::Face), FactorStatus::Verified);
        assert!(!session.is_verified());

        session.apply(SessionEvent::OtpSubmitted, now).unwrap();
        assert_eq!(
            session
                .apply(SessionEvent::OtpEvaluated(OtpResult::Correct), now)
                .unwrap(),
            VerificationStep::Verified
        );
        assert!(session.is_verified());
        assert_eq!(session.status(Factor::Otp), FactorStatus::Verified);
    }

    #[test]
    fn only_table_entries_are_accepted() {
        use SessionEvent as E;
        use VerificationStep as S;

        // Nothing leaves `Verified`.
        for event in [
            E::FaceSubmitted,
            E::FaceEvaluated(FaceResult::Matched),
            E::OtpSubmitted,
            E::OtpEvaluated(OtpResult::Correct),
            E::Abandoned,
        ] {
            assert_eq!(transition(S::Verified, event), None);
        }
        // The code cannot come before the face.
        assert_eq!(transition(S::Start, E::OtpSubmitted), None);
        assert_eq!(transition(S::Start, E::OtpEvaluated(OtpResult::Correct)), None);
        // Verdicts need a submission in flight.
        assert_eq!(transition(S::Start, E::FaceEvaluated(FaceResult::Matched)), None);
        assert_eq!(
            transition(S::FacePassed, E::OtpEvaluated(OtpResult::Correct)),
            None
        );
    }

    #[test]
    fn rejected_event_leaves_session_untouched() {
        let mut session = session();
        let before = session.clone();
        let err = session
            .apply(SessionEvent::OtpEvaluated(OtpResult::Correct), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWorkflowState { .. }));
        assert_eq!(session, before);
    }

    #[test]
    fn face_mismatch_returns_to_start() {
        let mut session = session();
        let now = Utc::now();
        session.apply(SessionEvent::FaceSubmitted, now).unwrap();
        let step = session
            .apply(SessionEvent::FaceEvaluated(FaceResult::Mismatched), now)
            .unwrap();
        assert_eq!(step, VerificationStep::Start);
        assert_eq!(session.status(Factor::Face), FactorStatus::Failed);
        assert_eq!(session.failures(Factor::Face), 1);
        assert_eq!(session.attempts_remaining(Factor::Face), 2);
    }

    #[test]
    fn wrong_code_returns_to_face_passed() {
        let mut session = session();
        pass_face(&mut session);
        let now = Utc::now();
        session.apply(SessionEvent::OtpSubmitted, now).unwrap();
        let step = session
            .apply(SessionEvent::OtpEvaluated(OtpResult::Incorrect), now)
            .unwrap();
        assert_eq!(step, VerificationStep::FacePassed);
        assert_eq!(session.status(Factor::Face), FactorStatus::Verified);
        assert_eq!(session.status(Factor::Otp), FactorStatus::Failed);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut session = session();
        let now = Utc::now();
        for _ in 0..3 {
            session.apply(SessionEvent::FaceSubmitted, now).unwrap();
            session
                .apply(SessionEvent::FaceEvaluated(FaceResult::Mismatched), now)
                .unwrap();
        }
        let err = session
            .apply(SessionEvent::FaceSubmitted, now)
            .unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted(Factor::Face)));
        assert_eq!(session.step(), VerificationStep::Start);
        assert!(!session.is_verified());
    }

    #[test]
    fn abandoning_does_not_count_an_attempt() {
        let mut session = session();
        let now = Utc::now();
        session.apply(SessionEvent::FaceSubmitted, now).unwrap();
        assert_eq!(
            session.apply(SessionEvent::Abandoned, now).unwrap(),
            VerificationStep::Start
        );
        assert_eq!(session.failures(Factor::Face), 0);
    }

    #[test]
    fn stale_sessions_restart_but_keep_failures() {
        let start = Utc::now();
        let mut session = session();
        session.apply(SessionEvent::FaceSubmitted, start).unwrap();
        session
            .apply(SessionEvent::FaceEvaluated(FaceResult::Mismatched), start)
            .unwrap();
        pass_face(&mut session);

        let ttl = Duration::minutes(15);
        let later = session.last_update() + Duration::minutes(16);
        assert!(session.is_stale(later, ttl));
        session.restart(later);
        assert_eq!(session.step(), VerificationStep::Start);
        assert_eq!(session.status(Factor::Face), FactorStatus::Pending);
        assert_eq!(session.failures(Factor::Face), 1);
        assert_eq!(session.last_update(), later);
    }

    #[test]
    fn verified_sessions_never_go_stale() {
        let mut session = session();
        pass_face(&mut session);
        let now = Utc::now();
        session.apply(SessionEvent::OtpSubmitted, now).unwrap();
        session
            .apply(SessionEvent::OtpEvaluated(OtpResult::Correct), now)
            .unwrap();
        let much_later = now + Duration::days(1);
        assert!(!session.is_stale(much_later, Duration::minutes(15)));
        session.restart(much_later);
        assert!(session.is_verified());
    }
}
