//! HS256 JWT validation.
//!
//! The gateway does not issue tokens in production; the platform's
//! account service does, with the same shared secret. `issue_token` is
//! provided for the dev CLI and for tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{AuthError, TokenValidator, UserId};

/// Registered claims carried by platform access tokens. `sub` is the
/// user id in decimal string form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                other => AuthError::MalformedToken(format!("{other:?}")),
            })?;

        let user_id: UserId = data
            .claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidClaims(format!("non-numeric sub: {}", data.claims.sub)))?;
        if user_id <= 0 {
            return Err(AuthError::InvalidClaims(format!(
                "non-positive sub: {user_id}"
            )));
        }
        Ok(user_id)
    }
}

/// Mints an HS256 token for `user_id`, valid for `ttl` from now.
pub fn issue_token(secret: &[u8], user_id: UserId, ttl: Duration) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|err| AuthError::Issuance(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-not-for-production";

    #[test]
    fn valid_token_yields_user_id() {
        let token = issue_token(SECRET, 42, Duration::minutes(5)).unwrap();
        let validator = JwtValidator::new(SECRET);
        assert_eq!(validator.validate(&token).unwrap(), 42);
    }

    #[test]
    fn expired_token_rejected() {
        let token = issue_token(SECRET, 42, Duration::minutes(-10)).unwrap();
        let validator = JwtValidator::new(SECRET);
        assert_eq!(validator.validate(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token(b"other-secret", 42, Duration::minutes(5)).unwrap();
        let validator = JwtValidator::new(SECRET);
        assert_eq!(validator.validate(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn garbage_token_rejected() {
        let validator = JwtValidator::new(SECRET);
        assert!(matches!(
            validator.validate("not.a.jwt"),
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[test]
    fn non_numeric_subject_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        let validator = JwtValidator::new(SECRET);
        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::InvalidClaims(_))
        ));
    }

    #[test]
    fn non_positive_subject_rejected() {
        let token = issue_token(SECRET, -3, Duration::minutes(5)).unwrap();
        let validator = JwtValidator::new(SECRET);
        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::InvalidClaims(_))
        ));
    }
}
