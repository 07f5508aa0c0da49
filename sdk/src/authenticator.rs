//! Server-side verification of `DIDWba` headers, and the client-side check of
//! the responder's embedded proof.
//!
//! Verification is single-shot and ordered: parse, timestamp, nonce, resolve,
//! key lookup, signature. The nonce is consumed before any signature work so
//! replays never reach the crypto layer.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::crypto::{self, redact_for_log};
use crate::did::{AuthenticationContext, DidDocument, KeyKind};
use crate::error::AuthError;
use crate::header::{signed_payload_hash, WbaAuthHeader};
use crate::nonce::NonceStore;
use crate::resolver::DidResolver;

/// Constant `service` value the responder signs its proof against,
/// independent of the real transport URL.
pub const VIRTUAL_BACK_SERVICE: &str = "virtual.WBAback";
/// URL form of the back-service domain, used when building the proof header.
pub const VIRTUAL_BACK_URL: &str = "http://virtual.WBAback";

/// Check an ISO-8601 `Z` timestamp against a symmetric window around now.
pub fn verify_timestamp(timestamp: &str, window_minutes: i64) -> Result<(), AuthError> {
    let request_time = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| AuthError::Timestamp(format!("malformed timestamp: {}", e)))?
        .with_timezone(&Utc);
    let now = Utc::now();
    let diff_seconds = (now - request_time).num_seconds().abs();
    if diff_seconds > window_minutes * 60 {
        return Err(AuthError::Timestamp(format!(
            "Timestamp expired. Current time: {}, request time: {}, difference: {} minutes",
            now,
            request_time,
            diff_seconds / 60
        )));
    }
    Ok(())
}

/// Verify the signature of a parsed header against a resolved DID document.
/// `service` is the server's own view of the request host.
fn verify_header_signature(
    header: &WbaAuthHeader,
    document: &DidDocument,
    service: &str,
) -> Result<(), AuthError> {
    let (public_key, kind) = document.public_key_by_fragment(&header.verification_method)?;

    let content_hash = signed_payload_hash(
        &header.did,
        &header.nonce,
        &header.timestamp,
        service,
        header.resp_did.as_deref(),
    )?;

    let signature = crypto::b64url_decode(&header.signature)?;
    let valid = match kind {
        KeyKind::Secp256k1 => {
            let der = crypto::rs_to_der(&signature)?;
            crypto::secp256k1_verify(&public_key, &content_hash, &der)
        }
        KeyKind::Ed25519 => crypto::ed25519_verify(&public_key, &content_hash, &signature),
    };
    if !valid {
        return Err(AuthError::InvalidSignature);
    }
    Ok(())
}

/// Verify an inbound `DIDWba` Authorization value.
///
/// On success returns the parsed header so the server can issue a response;
/// failures carry the stage that rejected the request.
pub async fn verify_auth_header(
    header_value: &str,
    context: &AuthenticationContext,
    resolver: &DidResolver,
    nonce_store: &NonceStore,
    window_minutes: i64,
) -> Result<WbaAuthHeader, AuthError> {
    let header = WbaAuthHeader::parse(header_value)?;

    verify_timestamp(&header.timestamp, window_minutes)?;

    // Consume the nonce before any crypto work; replays stop here.
    if !nonce_store.check_and_consume(&header.nonce) {
        return Err(AuthError::NonceReplay(header.nonce.clone()));
    }

    let document = resolver
        .resolve(&header.did)
        .await
        .ok_or_else(|| AuthError::DidResolve(header.did.clone()))?;

    let service = context
        .domain
        .clone()
        .or_else(|| crate::did::host_of(&context.request_url))
        .ok_or_else(|| {
            AuthError::HeaderParse(format!("request URL has no host: {}", context.request_url))
        })?;

    verify_header_signature(&header, &document, &service)?;

    debug!(
        did = %redact_for_log(&header.did),
        two_way = header.is_two_way(),
        "WBA header verified"
    );
    Ok(header)
}

/// Client-side check of the responder's proof header from a two-way response.
///
/// The proof is signed against the constant back-service domain rather than
/// the transport URL, and its nonce is not consumed: the proof is bound to
/// this response, not replayable into a request.
pub async fn verify_peer_response_header(
    header_value: &str,
    expected_peer_did: &str,
    resolver: &DidResolver,
    window_minutes: i64,
) -> Result<(), AuthError> {
    let header = WbaAuthHeader::parse(header_value)?;
    if !header.is_two_way() {
        return Err(AuthError::HeaderParse(
            "peer response header must be two-way".to_string(),
        ));
    }
    if header.did != expected_peer_did {
        return Err(AuthError::HeaderParse(format!(
            "peer response header signed by {} instead of the target",
            redact_for_log(&header.did)
        )));
    }

    verify_timestamp(&header.timestamp, window_minutes)?;

    let document = resolver
        .resolve(&header.did)
        .await
        .ok_or_else(|| AuthError::DidResolve(header.did.clone()))?;

    verify_header_signature(&header, &document, VIRTUAL_BACK_SERVICE)
}
