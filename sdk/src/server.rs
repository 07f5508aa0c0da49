//! Axum middleware verifying inbound requests and issuing response auth.
//!
//! Order per request: exemption policy, then the Bearer fast path, then full
//! `DIDWba` verification. Token issuance strictly follows verification
//! success, and the response `Authorization` value is assembled only after
//! the token is stored.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use crate::authenticator::{self, VIRTUAL_BACK_URL};
use crate::config::AuthConfig;
use crate::crypto::redact_for_log;
use crate::did::AuthenticationContext;
use crate::error::AuthError;
use crate::header::{self, WbaAuthHeader};
use crate::jwt;
use crate::keystore::KeyStore;
use crate::matcher::wildcard_match;
use crate::nonce::NonceStore;
use crate::resolver::DidResolver;
use crate::token_store::TokenStore;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared state behind the auth middleware. Stores are process-wide and
/// thread-safe; everything else is immutable after construction.
#[derive(Clone)]
pub struct AuthServerState {
    pub config: Arc<AuthConfig>,
    pub keystore: Arc<KeyStore>,
    pub resolver: Arc<DidResolver>,
    pub nonce_store: Arc<NonceStore>,
    pub token_store: Arc<TokenStore>,
    rate_limiters: Arc<RwLock<HashMap<String, Arc<DirectRateLimiter>>>>,
    rate_limit_quota: Quota,
}

impl AuthServerState {
    pub fn new(config: AuthConfig, keystore: Arc<KeyStore>) -> Self {
        let resolver = Arc::new(DidResolver::new(
            keystore.clone(),
            config.insecure_patterns.clone(),
            config.resolver_cache_seconds,
        ));
        let nonce_store = Arc::new(NonceStore::new(config.nonce_expire_minutes));
        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            config: Arc::new(config),
            keystore,
            resolver,
            nonce_store,
            token_store: Arc::new(TokenStore::new()),
            rate_limiters: Arc::new(RwLock::new(HashMap::new())),
            rate_limit_quota: quota,
        }
    }

    /// Per-DID request-rate backstop.
    fn check_rate_limit(&self, did: &str) -> Result<(), AuthError> {
        let limiter = {
            let mut limiters = self.rate_limiters.write();
            limiters
                .entry(did.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::direct(self.rate_limit_quota)))
                .clone()
        };
        limiter.check().map_err(|_| AuthError::RateLimitExceeded)
    }
}

/// Exemption check, consulted before any header parsing. Pattern `/` matches
/// only the root; a trailing-slash pattern matches as a prefix; everything
/// else is wildcard-matched.
pub fn is_exempt(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "/" {
            path == "/"
        } else if pattern.ends_with('/') {
            path == pattern || path.starts_with(pattern.as_str())
        } else {
            path == pattern || wildcard_match(pattern, path)
        }
    })
}

/// Authentication middleware. On success the response gains an
/// `authorization` header carrying the issued token (and, for two-way
/// requests, the responder's proof header).
pub async fn auth_middleware(
    State(state): State<AuthServerState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt(&path, &state.config.exempt_paths) {
        return next.run(request).await;
    }

    match authenticate_request(&state, &request).await {
        Ok(response_auth) => {
            let mut response = next.run(request).await;
            if let Some(value) = response_auth {
                match HeaderValue::from_str(&value) {
                    Ok(header_value) => {
                        response.headers_mut().insert("authorization", header_value);
                    }
                    Err(e) => {
                        debug!(error = %e, "Response auth header not representable");
                    }
                }
            }
            response
        }
        Err(err) => {
            debug!(path = %path, reason = %err.detail(), "Authentication rejected");
            err.into_response()
        }
    }
}

/// Verify one request; returns the response `Authorization` value to attach.
async fn authenticate_request(
    state: &AuthServerState,
    request: &Request,
) -> Result<Option<String>, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::HeaderParse("Missing Authorization header".to_string()))?;

    if let Some(token) = auth_header.strip_prefix("Bearer ") {
        let req_did = header_value(request, "req_did")
            .ok_or_else(|| AuthError::Token("missing req_did header".to_string()))?;
        let resp_did = header_value(request, "resp_did")
            .ok_or_else(|| AuthError::Token("missing resp_did header".to_string()))?;
        let result = verify_bearer_token(state, token, &req_did, &resp_did)?;
        return Ok(Some(result.to_string()));
    }

    // DID-based authentication.
    let parsed = WbaAuthHeader::parse(auth_header)?;
    let two_way = parsed.is_two_way();
    let target_did = match parsed.resp_did.clone() {
        Some(did) => did,
        // One-way requests must name the target via query parameter.
        None => query_param(request, "resp_did").ok_or_else(|| {
            AuthError::Forbidden("Cannot accept request that does not mention resp_did".to_string())
        })?,
    };
    if target_did.contains(":hostuser:") {
        return Err(AuthError::Forbidden(
            "Cannot accept request to hosted DID".to_string(),
        ));
    }

    state.check_rate_limit(&parsed.did)?;

    let host = header_value(request, "host").unwrap_or_else(|| "localhost".to_string());
    let request_url = format!("http://{}{}", host, request.uri());
    let domain = host.split(':').next().unwrap_or(&host).to_string();

    let mut context = AuthenticationContext::new(
        &parsed.did,
        Some(&target_did),
        &request_url,
        request.method().as_str(),
    );
    context.use_two_way_auth = two_way;
    context.domain = Some(domain);

    let verified = authenticator::verify_auth_header(
        auth_header,
        &context,
        &state.resolver,
        &state.nonce_store,
        state.config.nonce_expire_minutes,
    )
    .await?;

    let response_auth = generate_auth_response(state, &verified.did, two_way, &target_did)?;
    Ok(Some(response_auth))
}

/// Bearer fast path: the issued-token cache first, the RS256 public key as
/// fallback.
fn verify_bearer_token(
    state: &AuthServerState,
    token: &str,
    req_did: &str,
    resp_did: &str,
) -> Result<Value, AuthError> {
    match state.token_store.get(req_did, resp_did) {
        Some(stored) => {
            if stored.is_revoked {
                return Err(AuthError::Token("Token has been revoked".to_string()));
            }
            if stored.is_expired_at(Utc::now()) {
                return Err(AuthError::Token("Token has expired".to_string()));
            }
            if stored.token != token {
                return Err(AuthError::Token("Invalid token".to_string()));
            }
            debug!(req_did = %redact_for_log(req_did), "Bearer token matched issued-token cache");
        }
        None => {
            let entry = state.keystore.get(resp_did).ok_or_else(|| {
                AuthError::Token(format!("unknown resp_did: {}", redact_for_log(resp_did)))
            })?;
            let public_pem = entry
                .jwt_public_key_pem
                .as_deref()
                .ok_or_else(|| AuthError::Internal("JWT public key unavailable".to_string()))?;
            jwt::verify_access_token(
                public_pem,
                &state.config.jwt_algorithm,
                token,
                req_did,
                resp_did,
            )?;
            debug!(req_did = %redact_for_log(req_did), "Bearer token verified against public key");
        }
    }

    Ok(json!({
        "access_token": token,
        "token_type": "bearer",
        "req_did": req_did,
        "resp_did": resp_did,
    }))
}

/// Issue the response auth payload after a successful WBA verification.
///
/// One-way: the literal `bearer <jwt>`. Two-way: a JSON array of one object
/// embedding the responder's proof header, signed against the constant
/// back-service URL.
pub fn generate_auth_response(
    state: &AuthServerState,
    caller_did: &str,
    two_way: bool,
    target_did: &str,
) -> Result<String, AuthError> {
    let entry = state.keystore.get(target_did).ok_or_else(|| {
        AuthError::Internal(format!(
            "no local credentials for target {}",
            redact_for_log(target_did)
        ))
    })?;
    let private_pem = entry
        .jwt_private_key_pem
        .as_deref()
        .ok_or_else(|| AuthError::Internal("JWT private key unavailable".to_string()))?;

    let token = jwt::create_access_token(
        private_pem,
        &state.config.jwt_algorithm,
        caller_did,
        target_did,
        state.config.token_expire_seconds,
    )?;
    state.token_store.store(
        caller_did,
        target_did,
        &token,
        state.config.token_expire_seconds,
    );

    if !two_way {
        return Ok(format!("bearer {}", token));
    }

    let proof_context =
        AuthenticationContext::new(target_did, Some(caller_did), VIRTUAL_BACK_URL, "GET");
    let proof_header = header::build_auth_header(&proof_context, &entry.credentials)?;

    let payload = json!([{
        "access_token": token,
        "token_type": "bearer",
        "req_did": caller_did,
        "resp_did": target_did,
        "resp_did_auth_header": { "Authorization": proof_header },
    }]);
    serde_json::to_string(&payload)
        .map_err(|e| AuthError::Internal(format!("response payload serialization: {}", e)))
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn query_param(request: &Request, name: &str) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
