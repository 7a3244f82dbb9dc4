//! Token claims and validation primitives for the chat gateway.

pub mod error;
pub mod jwt;
pub mod validator;

pub use error::AuthError;
pub use jwt::{Claims, JwtValidator, issue_token};
pub use validator::TokenValidator;

/// Platform-wide user identifier. Always positive.
pub type UserId = i64;
