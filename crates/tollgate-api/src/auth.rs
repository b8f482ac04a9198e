//! Request authentication.
//!
//! Every mutating call carries a bearer token under the `authorization`
//! metadata key; the token is an HS256 JWT verified against the shared
//! secret, with expiry checked. Administrative calls additionally present
//! the preshared admin key under `x-admin-key`.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use tollgate_types::{BillingError, Result};

/// Claims carried by a caller token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Calling principal, informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry as unix seconds. Mandatory; tokens without it are rejected.
    pub exp: u64,
}

/// Verifies bearer tokens and the admin key.
pub struct Authenticator {
    decoding: DecodingKey,
    admin_key: String,
}

impl Authenticator {
    pub fn new(secret: &str, admin_key: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            admin_key: admin_key.to_string(),
        }
    }

    /// Verify the bearer token in the request metadata.
    pub fn verify_bearer(&self, headers: &HeaderMap) -> Result<Claims> {
        let value = headers
            .get("authorization")
            .ok_or_else(|| BillingError::Auth("missing authorization metadata".into()))?;
        let value = value
            .to_str()
            .map_err(|_| BillingError::Auth("malformed authorization metadata".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| BillingError::Auth("expected a bearer token".into()))?;

        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| BillingError::Auth(format!("invalid token: {err}")))
    }

    /// Check the preshared admin key. Implies a valid bearer token has
    /// already been presented.
    pub fn verify_admin(&self, headers: &HeaderMap) -> Result<()> {
        let value = headers
            .get("x-admin-key")
            .ok_or_else(|| BillingError::Auth("missing admin key".into()))?;
        if value.as_bytes() != self.admin_key.as_bytes() {
            return Err(BillingError::Auth("invalid admin key".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token(exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as u64;
        let claims = Claims {
            sub: Some("gateway".into()),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn accepts_a_valid_token() {
        let auth = Authenticator::new(SECRET, "admin-key");
        let headers = headers_with(&format!("Bearer {}", token(3600)));
        let claims = auth.verify_bearer(&headers).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("gateway"));
    }

    #[test]
    fn rejects_missing_header() {
        let auth = Authenticator::new(SECRET, "admin-key");
        let err = auth.verify_bearer(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), "UNAUTHENTICATED");
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        let auth = Authenticator::new(SECRET, "admin-key");
        let err = auth
            .verify_bearer(&headers_with("Basic dXNlcjpwYXNz"))
            .unwrap_err();
        assert!(err.to_string().contains("bearer"));
    }

    #[test]
    fn rejects_expired_token() {
        let auth = Authenticator::new(SECRET, "admin-key");
        let headers = headers_with(&format!("Bearer {}", token(-3600)));
        let err = auth.verify_bearer(&headers).unwrap_err();
        assert_eq!(err.code(), "UNAUTHENTICATED");
    }

    #[test]
    fn rejects_wrong_secret() {
        let auth = Authenticator::new("other-secret", "admin-key");
        let headers = headers_with(&format!("Bearer {}", token(3600)));
        assert!(auth.verify_bearer(&headers).is_err());
    }

    #[test]
    fn admin_key_is_checked_exactly() {
        let auth = Authenticator::new(SECRET, "admin-key");

        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", HeaderValue::from_static("admin-key"));
        assert!(auth.verify_admin(&headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", HeaderValue::from_static("nope"));
        assert!(auth.verify_admin(&headers).is_err());

        assert!(auth.verify_admin(&HeaderMap::new()).is_err());
    }
}
