use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;

/// Claims issued by the dashboard's auth service. Every protected route is
/// scoped to `tenant_id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: Uuid,
    pub exp: usize,
    pub iat: usize,
}

pub struct JwtService {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
    }

    /// Issuance belongs to the dashboard; this exists for local tooling and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
    }

    pub fn extract_token_from_header(auth_header: &str) -> Option<&str> {
        auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(JwtService::extract_token_from_header)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = JwtService::new(&state.jwt_secret)
        .validate_token(token)
        .map_err(|e| {
            tracing::debug!("Rejected bearer token: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims(tenant_id: Uuid, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "merchant-1".to_string(),
            tenant_id,
            exp: (now + exp_offset) as usize,
            iat: now as usize,
        }
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(JwtService::extract_token_from_header("Bearer abc.def"), Some("abc.def"));
        assert_eq!(JwtService::extract_token_from_header("Basic abc"), None);
        assert_eq!(JwtService::extract_token_from_header("Bearer "), None);
    }

    #[test]
    fn test_roundtrip_keeps_tenant() {
        let jwt = JwtService::new("jwt_secret");
        let tenant_id = Uuid::new_v4();
        let token = jwt.sign(&claims(tenant_id, 3600)).unwrap();

        assert_eq!(jwt.validate_token(&token).unwrap().tenant_id, tenant_id);
    }

    #[test]
    fn test_expired_or_foreign_tokens_fail() {
        let jwt = JwtService::new("jwt_secret");
        let expired = jwt.sign(&claims(Uuid::new_v4(), -3600)).unwrap();
        assert!(jwt.validate_token(&expired).is_err());

        let foreign = JwtService::new("other").sign(&claims(Uuid::new_v4(), 3600)).unwrap();
        assert!(jwt.validate_token(&foreign).is_err());
    }
}
