//! Gateway error types and their wire error codes.

use chat_gateway_auth::AuthError;

use crate::ws::protocol::ServerEnvelope;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
}

impl GatewayError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Protocol(_) => "protocol_error",
            Self::Auth(_) => "auth_failed",
            Self::Unauthenticated => "unauthenticated",
            Self::Validation(_) => "validation_error",
            Self::Transport(_) => "transport_error",
            Self::RelayUnavailable(_) => "relay_unavailable",
        }
    }

    /// Wire representation for recoverable errors.
    pub fn to_envelope(&self) -> ServerEnvelope {
        ServerEnvelope::error(self.error_code(), self.to_string())
    }

    /// Whether the connection should be torn down after reporting.
    /// Everything else, failed auth included, is reported and the
    /// connection stays open for the client to retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
