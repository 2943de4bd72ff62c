//! The one-time-code factor.
//!
//! The channel owns everything time-based about codes: expiry, the resend
//! cooldown and the scheduled purge of stale challenges. The voting workflow
//! only ever asks it to issue a code and to judge a submitted one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rocket::tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{common::SessionKey, session::OtpResult};
use crate::scheduled_task::ScheduledTask;

pub use code::Code;

mod code;

/// Out-of-band delivery of codes to the voter (SMS, e-mail, ...).
#[rocket::async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, key: &SessionKey, code: &Code) -> Result<()>;
}

/// Delivery that only writes the code to the debug log. For development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[rocket::async_trait]
impl CodeDelivery for LogDelivery {
    async fn deliver(&self, key: &SessionKey, code: &Code) -> Result<()> {
        debug!("One-time code for {key}: {code}");
        Ok(())
    }
}

/// Generates, delivers and checks one-time codes bound to a session.
#[rocket::async_trait]
pub trait OtpChannel: Send + Sync {
    /// Generate a fresh code for the session and deliver it.
    ///
    /// Fails with [`Error::OtpCooldown`] if the previous code was issued too
    /// recently.
    async fn issue(&self, key: &SessionKey) -> Result<()>;

    /// Judge a submitted code against the session's outstanding one.
    ///
    /// A missing or expired challenge is judged incorrect.
    async fn check(&self, key: &SessionKey, code: &Code) -> Result<OtpResult>;
}

/// An issued, not yet used code.
#[derive(Debug, Clone)]
struct Challenge {
    code: Code,
    issued_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
}

type ChallengeMap = HashMap<SessionKey, Challenge>;

/// Process-local [`OtpChannel`].
pub struct InMemoryOtpChannel {
    challenges: Arc<Mutex<ChallengeMap>>,
    purges: Mutex<HashMap<SessionKey, ScheduledTask<()>>>,
    delivery: Arc<dyn CodeDelivery>,
    ttl: Duration,
    cooldown: Duration,
}

impl InMemoryOtpChannel {
    pub fn new(delivery: Arc<dyn CodeDelivery>, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            challenges: Default::default(),
            purges: Default::default(),
            delivery,
            ttl,
            cooldown,
        }
    }

    /// Number of outstanding challenges.
    pub async fn outstanding(&self) -> usize {
        self.challenges.lock().await.len()
    }

    /// Replace any pending purge for `key` with one at `expire_at`.
    async fn schedule_purge(&self, key: SessionKey, expire_at: DateTime<Utc>) {
        let challenges = self.challenges.clone();
        let purge_key = key.clone();
        let purge = async move {
            let mut challenges = challenges.lock().await;
            // A resend may have replaced the challenge this purge was made for.
            if matches!(challenges.get(&purge_key), Some(c) if c.expire_at <= Utc::now()) {
                challenges.remove(&purge_key);
                debug!("Purged expired one-time code for {purge_key}");
            }
        };

        let mut purges = self.purges.lock().await;
        purges.retain(|_, task| !task.is_finished());
        if let Some(previous) = purges.remove(&key) {
            previous.cancel().await;
        }
        purges.insert(key, ScheduledTask::new(purge, expire_at));
    }
}

#[rocket::async_trait]
impl OtpChannel for InMemoryOtpChannel {
    async fn issue(&self, key: &SessionKey) -> Result<()> {
        let now = Utc::now();
        let challenge = {
            let mut challenges = self.challenges.lock().await;
            if let Some(previous) = challenges.get(key) {
                let ready_at = previous.issued_at + self.cooldown;
                if now < ready_at {
                    let millis = (ready_at - now).num_milliseconds();
                    let retry_after = u64::try_from(millis).unwrap_or(0).div_ceil(1000);
                    return Err(Error::OtpCooldown { retry_after });
                }
            }
            let challenge = Challenge {
                code: Code::random(),
                issued_at: now,
                expire_at: now + self.ttl,
            };
            challenges.insert(key.clone(), challenge.clone());
            challenge
        };

        if let Err(err) = self.delivery.deliver(key, &challenge.code).await {
            // An undelivered code must not hold the cooldown.
            self.challenges.lock().await.remove(key);
            return Err(err);
        }
        info!("Issued one-time code for {key}");
        self.schedule_purge(key.clone(), challenge.expire_at).await;
        Ok(())
    }

    async fn check(&self, key: &SessionKey, code: &Code) -> Result<OtpResult> {
        let mut challenges = self.challenges.lock().await;
        let result = match challenges.get(key) {
            Some(challenge) if challenge.expire_at < Utc::now() => {
                debug!("One-time code for {key} has expired");
                OtpResult::Incorrect
            }
            Some(challenge) if challenge.code.matches(code) => {
                // Codes are single use.
                challenges.remove(key);
                OtpResult::Correct
            }
            _ => OtpResult::Incorrect,
        };
        Ok(result)
    }
}
