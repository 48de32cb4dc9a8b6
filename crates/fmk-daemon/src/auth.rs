//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id and role. [`JwtKeys`] signs and
//! verifies; the [`AuthUser`] extractor turns the `Authorization: Bearer …`
//! header into an authenticated identity or a 401. No session state is kept
//! in-process.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use fmk_schemas::Role;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Signing/verification keys. Cheap to clone.
#[derive(Clone)]
pub struct JwtKeys {
    secret: String,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read the secret from the named env var.
    pub fn from_env(var: &str) -> anyhow::Result<Self> {
        let secret = std::env::var(var)
            .map_err(|_| anyhow::anyhow!("missing env var {var} (JWT signing secret)"))?;
        Ok(Self::new(secret))
    }

    /// Issue a token for `user_id` with `role`, valid for `ttl`.
    pub fn issue(
        &self,
        user_id: Uuid,
        role: Role,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &validation,
        )?;
        Ok(data.claims)
    }
}

/// Authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("malformed Authorization header".to_string()))?;

        let claims = state
            .jwt
            .verify(token)
            .map_err(|e| ApiError::Unauthorized(format!("invalid bearer token: {e}")))?;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_round_trip() {
        let keys = JwtKeys::new("test-secret");
        let uid = Uuid::new_v4();
        let token = keys.issue(uid, Role::Carrier, Duration::minutes(15)).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, uid);
        assert_eq!(claims.role, Role::Carrier);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let other = JwtKeys::new("other-secret");
        let token = keys
            .issue(Uuid::new_v4(), Role::Shipper, Duration::minutes(15))
            .unwrap();

        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let token = keys
            .issue(Uuid::new_v4(), Role::Shipper, Duration::minutes(-5))
            .unwrap();

        assert!(keys.verify(&token).is_err());
    }
}
