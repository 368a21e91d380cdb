//! Authentication-over-the-wire: decoding the credential frame and mapping
//! every failure to its close code.

use axum::extract::ws::Message;
use chat_auth::TokenError;

use super::protocol::{AuthRequest, CloseCode};
use crate::directory::DirectoryError;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("no token provided")]
    NoToken,

    #[error("credential frame is not a token object")]
    BadFormat,

    #[error("token rejected: {0}")]
    InvalidToken(TokenError),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("user lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("server shutting down")]
    Shutdown,
}

impl From<TokenError> for HandshakeError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => Self::NoToken,
            other => Self::InvalidToken(other),
        }
    }
}

impl HandshakeError {
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::NoToken => CloseCode::NoTokenProvided,
            Self::BadFormat => CloseCode::InvalidTokenFormat,
            Self::InvalidToken(_) => CloseCode::InvalidToken,
            Self::UserNotFound(_) => CloseCode::UserNotFound,
            Self::Directory(_) => CloseCode::InternalError,
            Self::Shutdown => CloseCode::ServerShutdown,
        }
    }

    /// Machine-readable cause for logs. Token failures keep their own code.
    pub fn error_code(&self) -> &str {
        match self {
            Self::NoToken => "missing_token",
            Self::BadFormat => "bad_credential_frame",
            Self::InvalidToken(err) => err.error_code(),
            Self::UserNotFound(_) => "user_not_found",
            Self::Directory(_) => "directory_error",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outcome of reading one frame while waiting for credentials.
#[derive(Debug)]
pub enum CredentialFrame {
    Token(String),
    /// Control frame, keep waiting.
    Skip,
    /// Peer closed before authenticating.
    Closed,
}

/// Extract the token from the first application frame.
pub fn read_credential(msg: Message) -> Result<CredentialFrame, HandshakeError> {
    match msg {
        Message::Text(text) => {
            let request: AuthRequest =
                serde_json::from_str(text.as_str()).map_err(|_| HandshakeError::BadFormat)?;
            match request.token {
                Some(token) if !token.trim().is_empty() => Ok(CredentialFrame::Token(token)),
                _ => Err(HandshakeError::NoToken),
            }
        }
        Message::Binary(_) => Err(HandshakeError::BadFormat),
        Message::Ping(_) | Message::Pong(_) => Ok(CredentialFrame::Skip),
        Message::Close(_) => Ok(CredentialFrame::Closed),
    }
}
