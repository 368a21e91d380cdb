//! Access-token primitives for the chat realtime server.

pub mod error;
pub mod token;

pub use error::TokenError;
pub use token::{Claims, DEFAULT_TOKEN_TTL_SECS, TokenService, TokenVerifier};
