//! Authentication error taxonomy shared by client and server flows.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid authorization header: {0}")]
    HeaderParse(String),

    #[error("Timestamp expired or malformed: {0}")]
    Timestamp(String),

    #[error("Invalid nonce: {0}")]
    NonceReplay(String),

    #[error("Failed to resolve DID document: {0}")]
    DidResolve(String),

    #[error("Verification method or key not found: {0}")]
    KeyNotFound(String),

    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token error: {0}")]
    Token(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::HeaderParse(_)
            | AuthError::Timestamp(_)
            | AuthError::NonceReplay(_)
            | AuthError::DidResolve(_)
            | AuthError::KeyNotFound(_)
            | AuthError::Crypto(_)
            | AuthError::InvalidSignature
            | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Transport(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Detail string surfaced to clients. Internal failures are masked.
    pub fn detail(&self) -> String {
        match self {
            AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "detail": self.detail() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AuthError::NonceReplay("abc".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::Forbidden("hosted".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn internal_detail_is_masked() {
        let err = AuthError::Internal("private key path /secrets/x".into());
        assert_eq!(err.detail(), "Internal server error");

        let err = AuthError::NonceReplay("deadbeef".into());
        assert!(err.detail().contains("Invalid nonce"));
    }
}
