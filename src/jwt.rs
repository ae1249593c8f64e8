//! Consumes bearer tokens issued by the (external) authorization server.
//! Issuance lives outside the core; this only verifies and decodes.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessTokenClaims {
    /// the authenticated principal
    pub sub: String,
    pub exp: usize,
    /// present when the token was scoped to a single pod
    #[serde(default)]
    pub pod: Option<String>,
}

pub fn verify_access_token(token: &str, secret: &str) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
    let validation = Validation::default();
    let decoded = decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(secret.as_ref()), &validation)?;
    Ok(decoded.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn round_trips_claims_through_a_shared_secret() {
        let claims = AccessTokenClaims { sub: "user-1".to_string(), exp: 9_999_999_999, pod: Some("alice".to_string()) };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        let decoded = verify_access_token(&token, "secret").unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.pod.as_deref(), Some("alice"));
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let claims = AccessTokenClaims { sub: "user-1".to_string(), exp: 9_999_999_999, pod: None };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert!(verify_access_token(&token, "wrong-secret").is_err());
    }
}
