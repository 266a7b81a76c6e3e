//! Bearer tokens for the administrative endpoints

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing or malformed authorization header")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User the token was issued to
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Caller identity placed in request extensions by the auth middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// HS256 token issuer and verifier
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Token for `user_id`, valid for `hours` (24 when `None`)
    pub fn issue(&self, user_id: &str, hours: Option<i64>) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(hours.unwrap_or(TOKEN_TTL_HOURS))).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }

    /// Token part of a `Bearer <token>` header value
    pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or(AuthError::MalformedHeader)?;
        if token.is_empty() {
            return Err(AuthError::MalformedHeader);
        }
        Ok(token)
    }
}
