//! The validation seam between the gateway and token formats.

use crate::{AuthError, UserId};

/// Exchanges a bearer token presented during the WebSocket handshake
/// for the authenticated user id.
///
/// Implementations must be cheap to call from per-connection tasks;
/// validation is pure CPU work, so the trait is synchronous.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}
