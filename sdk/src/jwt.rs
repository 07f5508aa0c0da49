//! RS256 access-token issuance and validation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by an ANP access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub req_did: String,
    pub resp_did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub exp: i64,
}

fn parse_algorithm(algorithm: &str) -> Result<Algorithm, AuthError> {
    algorithm
        .parse::<Algorithm>()
        .map_err(|_| AuthError::Token(format!("unsupported JWT algorithm: {}", algorithm)))
}

/// Issue an access token for `req_did` signed with the responder's RSA
/// private key. Fails when the key cannot be loaded.
pub fn create_access_token(
    private_key_pem: &str,
    algorithm: &str,
    req_did: &str,
    resp_did: &str,
    expires_in_seconds: i64,
) -> Result<String, AuthError> {
    let algorithm = parse_algorithm(algorithm)?;
    let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| AuthError::Internal(format!("JWT private key unusable: {}", e)))?;

    let claims = AccessTokenClaims {
        req_did: req_did.to_string(),
        resp_did: resp_did.to_string(),
        comments: Some("open for req_did".to_string()),
        exp: (Utc::now() + Duration::seconds(expires_in_seconds)).timestamp(),
    };

    encode(&Header::new(algorithm), &claims, &encoding_key)
        .map_err(|e| AuthError::Token(format!("JWT encoding failed: {}", e)))
}

/// Verify signature and expiry, and that the claims name the expected pair.
pub fn verify_access_token(
    public_key_pem: &str,
    algorithm: &str,
    token: &str,
    req_did: &str,
    resp_did: &str,
) -> Result<AccessTokenClaims, AuthError> {
    let algorithm = parse_algorithm(algorithm)?;
    let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| AuthError::Internal(format!("JWT public key unusable: {}", e)))?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<AccessTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AuthError::Token("Token has expired".to_string())
            }
            _ => AuthError::Token(format!("Invalid token: {}", e)),
        }
    })?;

    if data.claims.req_did != req_did {
        return Err(AuthError::Token("req_did mismatch".to_string()));
    }
    if data.claims.resp_did != resp_did {
        return Err(AuthError::Token("resp_did mismatch".to_string()));
    }
    Ok(data.claims)
}
