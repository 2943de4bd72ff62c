use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::common::VoterId;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// A voter identity issued by the external identity source.
///
/// Accepted from the `auth_token` cookie or an `Authorization: Bearer`
/// header, signed with the configured JWT secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "sub")]
    pub voter_id: VoterId,
}

impl AuthToken {
    pub fn new(voter_id: VoterId) -> Self {
        Self { voter_id }
    }

    /// Sign this token as a JWT valid until `expire_at`.
    pub fn encode(self, config: &Config, expire_at: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            token: self,
            expire_at,
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?)
    }

    /// Verify and decode a JWT.
    pub fn decode(token: &str, config: &Config) -> Result<Self> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?;
        Ok(data.claims.token)
    }
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((
                Status::InternalServerError,
                Error::Unauthorized("no JWT secret configured".to_string()),
            ));
        };

        let raw = req
            .cookies()
            .get(AUTH_TOKEN_COOKIE)
            .map(|cookie| cookie.value())
            .or_else(|| {
                req.headers()
                    .get_one("Authorization")
                    .and_then(|header| header.strip_prefix("Bearer "))
            });
        let Some(raw) = raw else {
            return Outcome::Error((
                Status::Unauthorized,
                Error::Unauthorized("no voter identity presented".to_string()),
            ));
        };

        match Self::decode(raw, config) {
            Ok(token) => Outcome::Success(token),
            Err(err) => {
                debug!("Rejected identity token: {err}");
                Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use rocket::http::Header;

    use super::*;

    impl AuthToken {
        /// An `Authorization` header carrying an hour-long token for `voter`.
        pub fn example_header(voter: &str, config: &Config) -> Header<'static> {
            let token = AuthToken::new(voter.into())
                .encode(config, Utc::now() + chrono::Duration::hours(1))
                .unwrap();
            Header::new("Authorization", format!("Bearer {token}"))
        }
    }
}
