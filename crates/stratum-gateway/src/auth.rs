//! Bearer token verification.
//!
//! Tokens are HS256 JWTs issued by the authentication subsystem. Verified
//! claims become an [`Identity`]; the core resolves it into a session.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use stratum_core::security::{Identity, Membership};
use stratum_core::SessionContext;
use tracing::debug;

use crate::error::AppError;
use crate::AppState;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
    /// Global roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Active organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Organization memberships.
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            roles: claims.roles,
            active_organization_id: claims.organization_id,
            memberships: claims.memberships,
        }
    }
}

/// Verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier; without a secret every token is rejected.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify an `Authorization` header value.
    pub fn verify(&self, header: &HeaderValue) -> Result<Identity, AppError> {
        let Some(key) = &self.key else {
            return Err(AppError::InvalidToken("token verification is not configured".to_string()));
        };
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::InvalidToken("expected a bearer token".to_string()))?;
        let data = decode::<Claims>(token.trim(), key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            AppError::InvalidToken(e.to_string())
        })?;
        Ok(data.claims.into())
    }
}

/// Session of the request; anonymous without an `Authorization` header.
#[derive(Debug, Clone)]
pub struct Session(pub SessionContext);

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = match parts.headers.get(AUTHORIZATION) {
            Some(header) => Some(state.verifier.verify(header)?),
            None => None,
        };
        Ok(Session(state.resolver.resolve(identity.as_ref()).await))
    }
}
