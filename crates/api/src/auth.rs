//! JWT issuance and the request authentication extractor

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use receiptly_shared::{OrgId, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: UserId,
    /// Organization the token is scoped to
    pub org: OrgId,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn issue(&self, user_id: UserId, org_id: OrgId) -> Result<String, ApiError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id,
            org: org_id,
            iat: now,
            exp: now + self.expiry_hours * 3600,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::Unauthorized)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// Authenticated caller, resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub org_id: OrgId,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = state.jwt_manager.validate(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            org_id: claims.org,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (UserId, OrgId) {
        (UserId(Uuid::new_v4()), OrgId::new())
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let mgr = JwtManager::new("test-secret", 24);
        let (user_id, org_id) = ids();
        let token = mgr.issue(user_id, org_id).unwrap();
        let claims = mgr.validate(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.org, org_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mgr = JwtManager::new("secret-a", 24);
        let other = JwtManager::new("secret-b", 24);
        let (user_id, org_id) = ids();
        let token = mgr.issue(user_id, org_id).unwrap();
        assert!(other.validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mgr = JwtManager::new("test-secret", -1);
        let (user_id, org_id) = ids();
        let token = mgr.issue(user_id, org_id).unwrap();
        assert!(mgr.validate(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let mgr = JwtManager::new("test-secret", 24);
        assert!(mgr.validate("not.a.jwt").is_err());
    }
}
