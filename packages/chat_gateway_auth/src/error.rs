//! Error types and wire error codes for token validation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    TokenExpired,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("token issuance failed: {0}")]
    Issuance(String),
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::MalformedToken(_) => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidClaims(_) => "invalid_claims",
            Self::Issuance(_) => "issuance_failed",
        }
    }
}

/// Serializable error response for HTTP or WebSocket surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
