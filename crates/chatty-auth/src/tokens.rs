use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chatty_types::models::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("expired token")]
    ExpiredToken,
    #[error("forced logout")]
    ForcedLogout,
    #[error("refresh token mismatch")]
    Replayed,
}

/// Signed access/refresh token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub exp: i64,
}

/// Secrets and lifetimes for the two token kinds.
#[derive(Clone)]
pub struct TokenKeys {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: chrono::Duration,
    pub refresh_ttl: chrono::Duration,
}

impl TokenKeys {
    pub fn new(access_secret: String, refresh_secret: String) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl: chrono::Duration::days(180),
            refresh_ttl: chrono::Duration::days(360),
        }
    }

    pub fn mint_access(&self, id: &str, username: &str, role: Role) -> Result<String, AuthError> {
        mint(&self.access_secret, id, username, role, self.access_ttl)
    }

    pub fn mint_refresh(&self, id: &str, username: &str, role: Role) -> Result<String, AuthError> {
        mint(&self.refresh_secret, id, username, role, self.refresh_ttl)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        verify(&self.access_secret, token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        verify(&self.refresh_secret, token)
    }
}

fn mint(
    secret: &str,
    id: &str,
    username: &str,
    role: Role,
    ttl: chrono::Duration,
) -> Result<String, AuthError> {
    let claims = Claims {
        id: id.to_string(),
        username: username.to_string(),
        role,
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}

fn verify(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        _ => AuthError::InvalidToken,
    })
}

/// Decode claims without verifying the signature or expiry. Used only to
/// recover the user id from an expired access token during silent refresh;
/// the recovered id is then checked against the liveness store.
pub fn decode_unverified(token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}
