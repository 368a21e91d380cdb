//! HS256 access tokens carrying a `userId` claim.
//!
//! Tokens are minted by the request layer at login and presented by clients
//! as the first frame on a realtime connection.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Default token lifetime: 7 days.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Resolves a presented credential to the user identity it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Result<String, TokenError>;
}

/// Issues and verifies tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8]) -> Self {
        Self::with_ttl(secret, Duration::seconds(DEFAULT_TOKEN_TTL_SECS))
    }

    pub fn with_ttl(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; clients refresh through the request layer.
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Issue a token for `user_id` using the configured lifetime.
    pub fn issue(&self, user_id: &str) -> Result<String, TokenError> {
        self.issue_with_ttl(user_id, self.ttl)
    }

    /// Issue a token with an explicit lifetime. A negative `ttl` yields an
    /// already-expired token.
    pub fn issue_with_ttl(&self, user_id: &str, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Issue(e.to_string()))
    }

    /// Verify signature and expiry, returning the decoded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.user_id.is_empty() {
            return Err(TokenError::Invalid("empty userId claim".into()));
        }
        Ok(data.claims)
    }
}

impl TokenVerifier for TokenService {
    fn verify_token(&self, token: &str) -> Result<String, TokenError> {
        self.verify(token).map(|claims| claims.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-at-least-32-bytes-long!!";

    #[test]
    fn issue_and_verify() {
        let svc = TokenService::new(SECRET);
        let token = svc.issue("user-1").unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.exp - claims.iat, DEFAULT_TOKEN_TTL_SECS);
    }

    #[test]
    fn claims_use_camel_case_user_id() {
        let claims = Claims {
            user_id: "u".into(),
            iat: 1,
            exp: 2,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["userId"], "u");
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn empty_token_is_missing() {
        let svc = TokenService::new(SECRET);
        assert_eq!(svc.verify("").unwrap_err(), TokenError::Missing);
        assert_eq!(svc.verify("   ").unwrap_err(), TokenError::Missing);
    }

    #[test]
    fn garbage_is_malformed() {
        let svc = TokenService::new(SECRET);
        let err = svc.verify("not-a-jwt").unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn expired_token_rejected() {
        let svc = TokenService::new(SECRET);
        let token = svc.issue_with_ttl("user-1", Duration::seconds(-120)).unwrap();
        assert_eq!(svc.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn wrong_secret_rejected() {
        let issuer = TokenService::new(SECRET);
        let other = TokenService::new(b"a-completely-different-secret-value");
        let token = issuer.issue("user-1").unwrap();
        assert_eq!(
            other.verify(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn empty_user_claim_rejected() {
        let svc = TokenService::new(SECRET);
        let token = svc.issue("").unwrap();
        assert!(matches!(
            svc.verify(&token).unwrap_err(),
            TokenError::Invalid(_)
        ));
    }

    #[test]
    fn verifier_trait_returns_user_id() {
        let svc = TokenService::new(SECRET);
        let token = svc.issue("user-42").unwrap();
        let verifier: &dyn TokenVerifier = &svc;
        assert_eq!(verifier.verify_token(&token).unwrap(), "user-42");
    }
}
