//! Client-side authentication flow: two-way first, one-way fallback, peer
//! verification, token adoption.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::authenticator;
use crate::config::AuthConfig;
use crate::crypto::redact_for_log;
use crate::did::AuthenticationContext;
use crate::error::AuthError;
use crate::header::build_auth_header;
use crate::keystore::KeyStore;
use crate::resolver::DidResolver;
use crate::token_store::RemoteTokenStore;
use crate::transport::{HttpTransport, TransportResponse};

/// Outcome of one authenticated call.
#[derive(Debug)]
pub struct AuthCallResult {
    pub status: u16,
    pub body: Value,
    pub message: String,
    pub auth_ok: bool,
}

impl AuthCallResult {
    fn failed(status: u16, body: Value, message: impl Into<String>) -> Self {
        Self {
            status,
            body,
            message: message.into(),
            auth_ok: false,
        }
    }
}

/// Drives outbound authenticated requests for locally hosted agents.
pub struct AuthClient {
    config: Arc<AuthConfig>,
    keystore: Arc<KeyStore>,
    resolver: Arc<DidResolver>,
    remote_tokens: Arc<RemoteTokenStore>,
    transport: Arc<dyn HttpTransport>,
}

impl AuthClient {
    pub fn new(
        config: Arc<AuthConfig>,
        keystore: Arc<KeyStore>,
        resolver: Arc<DidResolver>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            keystore,
            resolver,
            remote_tokens: Arc::new(RemoteTokenStore::new()),
            transport,
        }
    }

    pub fn remote_tokens(&self) -> &RemoteTokenStore {
        &self.remote_tokens
    }

    /// One logical authenticated call.
    ///
    /// Tries two-way authentication first; on 401/403 retries exactly once
    /// with a one-way header. A 2xx response carrying an `Authorization`
    /// header yields a token; two-way responses additionally embed the
    /// responder's proof, which must verify against the virtual back-service
    /// domain or the call reports `auth_ok = false` despite the 2xx.
    pub async fn authenticated_request(
        &self,
        caller_did: &str,
        target_did: &str,
        request_url: &str,
        method: &str,
        json_data: Option<&Value>,
    ) -> AuthCallResult {
        let Some(entry) = self.keystore.get(caller_did) else {
            return AuthCallResult::failed(
                500,
                Value::Null,
                format!("no local credentials for caller {}", redact_for_log(caller_did)),
            );
        };

        let mut context =
            AuthenticationContext::new(caller_did, Some(target_did), request_url, method);
        context.json_data = json_data.cloned();

        // First attempt: two-way.
        let response = match self.send_with_header(&context, &entry.credentials).await {
            Ok(response) => response,
            Err(e) => return AuthCallResult::failed(500, Value::Null, e.to_string()),
        };

        let response = if response.status == 401 || response.status == 403 {
            // Single fallback: one-way.
            context.use_two_way_auth = false;
            match self.send_with_header(&context, &entry.credentials).await {
                Ok(retry) => {
                    if retry.status == 401 || retry.status == 403 {
                        return AuthCallResult::failed(
                            401,
                            retry.body,
                            "authentication failed after one-way fallback",
                        );
                    }
                    retry
                }
                Err(e) => return AuthCallResult::failed(500, Value::Null, e.to_string()),
            }
        } else {
            response
        };

        if !response.is_success() {
            return AuthCallResult::failed(
                response.status,
                response.body,
                format!("request failed with HTTP {}", response.status),
            );
        }

        self.adopt_response_auth(target_did, response).await
    }

    async fn send_with_header(
        &self,
        context: &AuthenticationContext,
        credentials: &crate::did::DidCredentials,
    ) -> Result<TransportResponse, AuthError> {
        let auth_header = build_auth_header(context, credentials)?;
        let mut headers = context.custom_headers.clone();
        headers.insert("Authorization".to_string(), auth_header);
        self.transport
            .send(
                &context.method,
                &context.request_url,
                &headers,
                context.json_data.as_ref(),
            )
            .await
    }

    /// Parse the response `Authorization` value and adopt the issued token.
    async fn adopt_response_auth(
        &self,
        target_did: &str,
        response: TransportResponse,
    ) -> AuthCallResult {
        let Some(auth_value) = response.header("authorization").map(str::to_string) else {
            // No token issued; an unauthenticated page or first-generation peer.
            return AuthCallResult {
                status: response.status,
                body: response.body,
                message: "no token issued by peer".to_string(),
                auth_ok: true,
            };
        };

        if let Some(token) = strip_bearer_prefix(&auth_value) {
            self.remote_tokens.store(target_did, token);
            debug!(target = %redact_for_log(target_did), "Adopted one-way token");
            return AuthCallResult {
                status: response.status,
                body: response.body,
                message: format!("one-way authentication succeeded with {}", target_did),
                auth_ok: true,
            };
        }

        let (token, proof_header) = match parse_two_way_response(
            &auth_value,
            self.config.accept_legacy_response,
        ) {
            Ok(parts) => parts,
            Err(e) => {
                return AuthCallResult::failed(
                    response.status,
                    response.body,
                    format!("malformed response authorization: {}", e),
                )
            }
        };

        if let Err(e) = authenticator::verify_peer_response_header(
            &proof_header,
            target_did,
            &self.resolver,
            self.config.nonce_expire_minutes,
        )
        .await
        {
            return AuthCallResult::failed(
                response.status,
                response.body,
                format!("peer DID auth header verification failed: {}", e),
            );
        }

        self.remote_tokens.store(target_did, &token);
        debug!(target = %redact_for_log(target_did), "Two-way authentication verified");
        AuthCallResult {
            status: response.status,
            body: response.body,
            message: format!("two-way authentication succeeded with {}", target_did),
            auth_ok: true,
        }
    }

    /// Follow-up call with a previously adopted bearer token. Revokes the
    /// cached token when the peer refuses it.
    pub async fn bearer_request(
        &self,
        caller_did: &str,
        target_did: &str,
        request_url: &str,
        method: &str,
        json_data: Option<&Value>,
    ) -> Result<(u16, Value), AuthError> {
        let token = self
            .remote_tokens
            .get(target_did)
            .ok_or_else(|| AuthError::Token(format!("no cached token for {}", target_did)))?;

        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", token.token),
        );
        headers.insert("req_did".to_string(), caller_did.to_string());
        headers.insert("resp_did".to_string(), target_did.to_string());

        let response = self
            .transport
            .send(method, request_url, &headers, json_data)
            .await?;
        if response.status == 401 || response.status == 403 {
            self.remote_tokens.revoke(target_did);
        }
        Ok((response.status, response.body))
    }
}

fn strip_bearer_prefix(auth_value: &str) -> Option<&str> {
    let lower = auth_value.get(..7)?;
    if lower.eq_ignore_ascii_case("bearer ") {
        Some(auth_value[7..].trim())
    } else {
        None
    }
}

/// Extract `(access_token, resp_did_auth_header)` from a two-way response.
/// The normalized form is a JSON array of one object; the legacy single
/// object is accepted when the compatibility flag is on.
fn parse_two_way_response(
    auth_value: &str,
    accept_legacy: bool,
) -> Result<(String, String), AuthError> {
    let parsed: Value = serde_json::from_str(auth_value)
        .map_err(|e| AuthError::HeaderParse(format!("response authorization: {}", e)))?;

    let object = match &parsed {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| AuthError::HeaderParse("empty response authorization".to_string()))?,
        Value::Object(_) if accept_legacy => &parsed,
        _ => {
            return Err(AuthError::HeaderParse(
                "unexpected response authorization shape".to_string(),
            ))
        }
    };

    let token = object
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::HeaderParse("response missing access_token".to_string()))?;
    let proof_header = object
        .get("resp_did_auth_header")
        .and_then(|h| h.get("Authorization"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AuthError::HeaderParse("response missing resp_did_auth_header".to_string())
        })?;
    Ok((token.to_string(), proof_header.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::did::SECP256K1_KEY_TYPE;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use k256::elliptic_curve::sec1::ToEncodedPoint;
    use k256::pkcs8::EncodePrivateKey;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    const ALICE: &str = "did:wba:localhost%3A9527:wba:user:alice";
    const BOB: &str = "did:wba:localhost%3A9527:wba:user:bob";
    const URL: &str = "http://localhost:9527/agent/api/bob/demo";

    /// Transport returning a canned sequence of responses.
    struct CannedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, AuthError>>>,
    }

    impl CannedTransport {
        fn new(responses: Vec<Result<TransportResponse, AuthError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(
            &self,
            _method: &str,
            _url: &str,
            _headers: &HashMap<String, String>,
            _json_body: Option<&Value>,
        ) -> Result<TransportResponse, AuthError> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::Transport("no canned response".into())))
        }
    }

    fn response(status: u16, auth_header: Option<&str>) -> TransportResponse {
        let mut headers = HashMap::new();
        if let Some(value) = auth_header {
            headers.insert("authorization".to_string(), value.to_string());
        }
        TransportResponse {
            status,
            headers,
            body: json!({}),
        }
    }

    /// Keystore holding only alice, materialized on disk.
    fn alice_keystore() -> (Arc<KeyStore>, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("alice");
        std::fs::create_dir_all(&dir).unwrap();
        let secret = k256::SecretKey::random(&mut rand::thread_rng());
        let point = secret.public_key().to_encoded_point(false);
        let doc = json!({
            "id": ALICE,
            "verificationMethod": [{
                "id": format!("{}#key-1", ALICE),
                "type": SECP256K1_KEY_TYPE,
                "controller": ALICE,
                "publicKeyMultibase": multibase::encode(multibase::Base::Base58Btc, point.as_bytes()),
            }],
            "authentication": [format!("{}#key-1", ALICE)],
        });
        std::fs::write(
            dir.join("did_document.json"),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join("key-1_private.pem"),
            secret
                .to_pkcs8_pem(k256::pkcs8::LineEnding::LF)
                .unwrap()
                .to_string(),
        )
        .unwrap();
        (Arc::new(KeyStore::load(root.path()).unwrap()), root)
    }

    fn client_with(
        keystore: Arc<KeyStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> AuthClient {
        let config = Arc::new(AuthConfig::default());
        let resolver = Arc::new(DidResolver::new(
            keystore.clone(),
            config.insecure_patterns.clone(),
            config.resolver_cache_seconds,
        ));
        AuthClient::new(config, keystore, resolver, transport)
    }

    #[tokio::test]
    async fn transport_failure_maps_to_500() {
        let (keystore, _root) = alice_keystore();
        let transport = Arc::new(CannedTransport::new(vec![Err(AuthError::Transport(
            "connection refused".into(),
        ))]));
        let client = client_with(keystore, transport);

        let result = client
            .authenticated_request(ALICE, BOB, URL, "GET", None)
            .await;
        assert_eq!(result.status, 500);
        assert!(!result.auth_ok);
    }

    #[tokio::test]
    async fn non_auth_status_short_circuits_with_status_preserved() {
        let (keystore, _root) = alice_keystore();
        let transport = Arc::new(CannedTransport::new(vec![Ok(response(404, None))]));
        let client = client_with(keystore, transport);

        let result = client
            .authenticated_request(ALICE, BOB, URL, "GET", None)
            .await;
        assert_eq!(result.status, 404);
        assert!(!result.auth_ok);
    }

    #[tokio::test]
    async fn second_rejection_ends_the_flow() {
        let (keystore, _root) = alice_keystore();
        // Two-way rejected, one-way fallback rejected too: exactly two sends.
        let transport = Arc::new(CannedTransport::new(vec![
            Ok(response(401, None)),
            Ok(response(401, None)),
        ]));
        let client = client_with(keystore, transport);

        let result = client
            .authenticated_request(ALICE, BOB, URL, "GET", None)
            .await;
        assert_eq!(result.status, 401);
        assert!(!result.auth_ok);
    }

    #[tokio::test]
    async fn failed_peer_proof_reports_auth_failure_despite_200() {
        let (keystore, _root) = alice_keystore();
        // The peer answers 200, but the embedded proof is signed by the wrong
        // DID: the client must flag the exchange even though HTTP succeeded.
        let entry = keystore.get(ALICE).unwrap();
        let proof_context = crate::did::AuthenticationContext::new(
            ALICE,
            Some(BOB),
            crate::authenticator::VIRTUAL_BACK_URL,
            "GET",
        );
        let bogus_proof = build_auth_header(&proof_context, &entry.credentials).unwrap();
        let auth_value = json!([{
            "access_token": "jwt",
            "token_type": "bearer",
            "req_did": ALICE,
            "resp_did": BOB,
            "resp_did_auth_header": { "Authorization": bogus_proof },
        }])
        .to_string();

        let transport = Arc::new(CannedTransport::new(vec![Ok(response(
            200,
            Some(&auth_value),
        ))]));
        let client = client_with(keystore, transport);

        let result = client
            .authenticated_request(ALICE, BOB, URL, "GET", None)
            .await;
        assert_eq!(result.status, 200);
        assert!(!result.auth_ok);
        assert!(result.message.contains("peer DID auth header"));
        // No partial token is stored.
        assert!(client.remote_tokens().get(BOB).is_none());
    }

    #[tokio::test]
    async fn one_way_token_adopted_from_bearer_response() {
        let (keystore, _root) = alice_keystore();
        let transport = Arc::new(CannedTransport::new(vec![
            Ok(response(401, None)),
            Ok(response(200, Some("bearer issued-jwt"))),
        ]));
        let client = client_with(keystore, transport);

        let result = client
            .authenticated_request(ALICE, BOB, URL, "GET", None)
            .await;
        assert_eq!(result.status, 200);
        assert!(result.auth_ok);
        assert_eq!(client.remote_tokens().get(BOB).unwrap().token, "issued-jwt");
    }

    #[test]
    fn bearer_prefix_is_case_insensitive() {
        assert_eq!(strip_bearer_prefix("bearer abc"), Some("abc"));
        assert_eq!(strip_bearer_prefix("Bearer abc"), Some("abc"));
        assert_eq!(strip_bearer_prefix("BEARER abc"), Some("abc"));
        assert_eq!(strip_bearer_prefix("DIDWba did=\"x\""), None);
        assert_eq!(strip_bearer_prefix("short"), None);
    }

    #[test]
    fn parses_array_response_form() {
        let value = json!([{
            "access_token": "jwt",
            "token_type": "bearer",
            "req_did": "did:a",
            "resp_did": "did:b",
            "resp_did_auth_header": { "Authorization": "DIDWba did=\"did:b\"" },
        }])
        .to_string();
        let (token, header) = parse_two_way_response(&value, false).unwrap();
        assert_eq!(token, "jwt");
        assert!(header.starts_with("DIDWba"));
    }

    #[test]
    fn legacy_object_form_gated_by_flag() {
        let value = json!({
            "access_token": "jwt",
            "resp_did_auth_header": { "Authorization": "DIDWba did=\"did:b\"" },
        })
        .to_string();
        assert!(parse_two_way_response(&value, true).is_ok());
        assert!(parse_two_way_response(&value, false).is_err());
    }

    #[test]
    fn missing_fields_rejected() {
        let value = json!([{ "token_type": "bearer" }]).to_string();
        assert!(parse_two_way_response(&value, false).is_err());

        let value = json!([{ "access_token": "jwt" }]).to_string();
        let err = parse_two_way_response(&value, false).unwrap_err();
        assert!(err.to_string().contains("resp_did_auth_header"));
    }
}
