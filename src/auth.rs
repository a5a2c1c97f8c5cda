use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::QueueError, state::AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // did
    pub exp: usize,  // expiration timestamp
    pub iat: usize,  // issued at
}

/// Resolves a caller credential to a `did`.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

pub struct JwtAuthenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }

    /// Sign a token for `did` valid for `ttl_secs`. Used by tooling and tests.
    pub fn issue(&self, did: &str, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: did.to_string(),
            exp: (now + ttl_secs).max(0) as usize,
            iat: now.max(0) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Option<String> {
        match self.decode_claims(token) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                log::debug!("[queue] rejected token: {e}");
                None
            }
        }
    }
}

/// `Authorization: Bearer <token>` → `<token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller of a queue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedDid(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthedDid {
    type Rejection = QueueError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
            .and_then(|token| state.auth.authenticate(token))
            .map(AuthedDid)
            .ok_or(QueueError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_authenticates() {
        let auth = JwtAuthenticator::new("test-secret");
        let token = auth.issue("did:plc:abc", 3600).unwrap();
        assert_eq!(auth.authenticate(&token).as_deref(), Some("did:plc:abc"));
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let issuer = JwtAuthenticator::new("one");
        let verifier = JwtAuthenticator::new("two");
        let token = issuer.issue("did:plc:abc", 3600).unwrap();
        assert!(verifier.authenticate(&token).is_none());

        let expired = issuer.issue("did:plc:abc", -3600).unwrap();
        assert!(issuer.authenticate(&expired).is_none());
    }

    #[test]
    fn extra_claims_are_ignored() {
        let auth = JwtAuthenticator::new("test-secret");
        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "did:plc:abc",
            "exp": now + 3600,
            "iat": now,
            "display_name": "Someone",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(auth.authenticate(&token).as_deref(), Some("did:plc:abc"));
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
