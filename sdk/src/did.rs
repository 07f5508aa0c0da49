//! DID document and key-material data model.

use std::collections::HashMap;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{self, CryptoError};
use crate::error::AuthError;

pub const SECP256K1_KEY_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";
pub const ED25519_KEY_TYPE: &str = "Ed25519VerificationKey2018";

/// Curve family a verification method or key pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Secp256k1,
    Ed25519,
}

impl KeyKind {
    pub fn from_method_type(key_type: &str) -> Result<Self, AuthError> {
        match key_type {
            SECP256K1_KEY_TYPE => Ok(KeyKind::Secp256k1),
            ED25519_KEY_TYPE => Ok(KeyKind::Ed25519),
            other => Err(AuthError::KeyNotFound(format!(
                "unsupported verification method type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyMultibase", skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,
    #[serde(rename = "publicKeyJwk", skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

impl VerificationMethod {
    /// Fragment part of the method id, without the leading `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.id.split('#').nth(1)
    }

    pub fn kind(&self) -> Result<KeyKind, AuthError> {
        KeyKind::from_method_type(&self.key_type)
    }

    /// Decode the public key bytes carried by this method.
    ///
    /// secp256k1 keys are normalized to 65-byte uncompressed SEC1 form,
    /// Ed25519 keys to their raw 32 bytes. When both encodings are present
    /// they must agree, else the key is rejected.
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, AuthError> {
        let kind = self.kind()?;

        let from_multibase = self
            .public_key_multibase
            .as_deref()
            .map(|mb| decode_multibase_key(mb, kind))
            .transpose()?;
        let from_jwk = self
            .public_key_jwk
            .as_ref()
            .map(|jwk| decode_jwk_key(jwk, kind))
            .transpose()?;

        match (from_multibase, from_jwk) {
            (Some(a), Some(b)) => {
                if a != b {
                    return Err(AuthError::KeyNotFound(format!(
                        "conflicting key encodings on {}",
                        self.id
                    )));
                }
                Ok(a)
            }
            (Some(a), None) => Ok(a),
            (None, Some(b)) => Ok(b),
            (None, None) => Err(AuthError::KeyNotFound(format!(
                "no public key encoding on {}",
                self.id
            ))),
        }
    }
}

fn decode_multibase_key(encoded: &str, kind: KeyKind) -> Result<Vec<u8>, AuthError> {
    let bytes = crypto::multibase_decode(encoded)?;
    normalize_public_key(&bytes, kind)
}

fn decode_jwk_key(jwk: &PublicKeyJwk, kind: KeyKind) -> Result<Vec<u8>, AuthError> {
    match kind {
        KeyKind::Secp256k1 => {
            if jwk.kty != "EC" || !jwk.crv.eq_ignore_ascii_case("secp256k1") {
                return Err(AuthError::KeyNotFound(format!(
                    "expected EC secp256k1 JWK, got {} {}",
                    jwk.kty, jwk.crv
                )));
            }
            let x = crypto::b64url_decode(&jwk.x)?;
            let y = crypto::b64url_decode(
                jwk.y
                    .as_deref()
                    .ok_or_else(|| AuthError::KeyNotFound("JWK missing y coordinate".into()))?,
            )?;
            if x.len() != 32 || y.len() != 32 {
                return Err(AuthError::KeyNotFound(
                    "JWK coordinates must be 32 bytes each".into(),
                ));
            }
            let mut sec1 = Vec::with_capacity(65);
            sec1.push(0x04);
            sec1.extend_from_slice(&x);
            sec1.extend_from_slice(&y);
            normalize_public_key(&sec1, kind)
        }
        KeyKind::Ed25519 => {
            if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
                return Err(AuthError::KeyNotFound(format!(
                    "expected OKP Ed25519 JWK, got {} {}",
                    jwk.kty, jwk.crv
                )));
            }
            let x = crypto::b64url_decode(&jwk.x)?;
            normalize_public_key(&x, kind)
        }
    }
}

/// Validate the bytes as a point on the declared curve and normalize the
/// representation (uncompressed SEC1 for secp256k1, raw 32 for Ed25519).
fn normalize_public_key(bytes: &[u8], kind: KeyKind) -> Result<Vec<u8>, AuthError> {
    match kind {
        KeyKind::Secp256k1 => {
            let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(|e| {
                AuthError::Crypto(CryptoError::InvalidKey(format!("secp256k1 point: {}", e)))
            })?;
            Ok(key.to_encoded_point(false).as_bytes().to_vec())
        }
        KeyKind::Ed25519 => {
            let raw: [u8; 32] = bytes.try_into().map_err(|_| {
                AuthError::Crypto(CryptoError::InvalidKey(
                    "ed25519 public key must be 32 bytes".into(),
                ))
            })?;
            ed25519_dalek::VerifyingKey::from_bytes(&raw).map_err(|e| {
                AuthError::Crypto(CryptoError::InvalidKey(format!("ed25519 point: {}", e)))
            })?;
            Ok(raw.to_vec())
        }
    }
}

/// Entries of the `authentication` list: either a reference into
/// `verificationMethod` or an inline method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthenticationRef {
    Reference(String),
    Embedded(VerificationMethod),
}

impl AuthenticationRef {
    pub fn fragment(&self) -> Option<&str> {
        match self {
            AuthenticationRef::Reference(id) => id.split('#').nth(1),
            AuthenticationRef::Embedded(vm) => vm.fragment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub authentication: Vec<AuthenticationRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<Service>>,
    /// Original JSON, kept verbatim for canonical reconstruction.
    #[serde(skip)]
    pub raw_document: Option<Value>,
}

impl DidDocument {
    /// Parse a document from its JSON value, retaining the raw form.
    pub fn from_value(value: Value) -> Result<Self, AuthError> {
        let mut doc: DidDocument = serde_json::from_value(value.clone())
            .map_err(|e| AuthError::DidResolve(format!("malformed DID document: {}", e)))?;
        if doc.verification_method.is_empty() {
            return Err(AuthError::DidResolve(
                "DID document has no verification methods".into(),
            ));
        }
        doc.raw_document = Some(value);
        Ok(doc)
    }

    /// Fragment of the first `authentication` entry, validated to refer to an
    /// existing verification method. Used to select the signing key.
    pub fn first_authentication_fragment(&self) -> Result<String, AuthError> {
        let fragment = self
            .authentication
            .first()
            .and_then(|a| a.fragment())
            .ok_or_else(|| {
                AuthError::KeyNotFound("DID document has no usable authentication entry".into())
            })?;
        if self.verification_method_by_fragment(fragment).is_none() {
            return Err(AuthError::KeyNotFound(format!(
                "authentication reference #{} has no matching verification method",
                fragment
            )));
        }
        Ok(fragment.to_string())
    }

    /// Look up a verification method by fragment (with or without `#`).
    pub fn verification_method_by_fragment(&self, fragment: &str) -> Option<&VerificationMethod> {
        let fragment = fragment.trim_start_matches('#');
        self.verification_method
            .iter()
            .find(|vm| vm.fragment() == Some(fragment))
    }

    /// Public key bytes and curve kind for a fragment.
    pub fn public_key_by_fragment(&self, fragment: &str) -> Result<(Vec<u8>, KeyKind), AuthError> {
        let vm = self.verification_method_by_fragment(fragment).ok_or_else(|| {
            AuthError::KeyNotFound(format!("verification method #{} not found", fragment))
        })?;
        Ok((vm.public_key_bytes()?, vm.kind()?))
    }
}

/// A private/public key pair backing one verification method.
#[derive(Clone)]
pub struct DidKeyPair {
    key_id: String,
    kind: KeyKind,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for DidKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DidKeyPair")
            .field("key_id", &self.key_id)
            .field("kind", &self.kind)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl DidKeyPair {
    /// Build from a raw 32-byte secp256k1 private scalar.
    pub fn from_secp256k1_bytes(private_key: &[u8], key_id: &str) -> Result<Self, AuthError> {
        let secret = k256::SecretKey::from_slice(private_key).map_err(|e| {
            AuthError::Crypto(CryptoError::InvalidKey(format!("secp256k1: {}", e)))
        })?;
        let public_key = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Ok(Self {
            key_id: key_id.to_string(),
            kind: KeyKind::Secp256k1,
            private_key: private_key.to_vec(),
            public_key,
        })
    }

    /// Build from a raw 32-byte Ed25519 seed.
    pub fn from_ed25519_bytes(private_key: &[u8], key_id: &str) -> Result<Self, AuthError> {
        let seed: [u8; 32] = private_key.try_into().map_err(|_| {
            AuthError::Crypto(CryptoError::InvalidKey("ed25519 seed must be 32 bytes".into()))
        })?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        Ok(Self {
            key_id: key_id.to_string(),
            kind: KeyKind::Ed25519,
            private_key: seed.to_vec(),
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
        })
    }

    /// Load from a PEM private key (PKCS#8 or SEC1 secp256k1, PKCS#8 Ed25519).
    pub fn from_pem(pem: &str, key_id: &str) -> Result<Self, AuthError> {
        use ed25519_dalek::pkcs8::DecodePrivateKey as _;
        use k256::pkcs8::DecodePrivateKey as _;

        if let Ok(secret) = k256::SecretKey::from_pkcs8_pem(pem) {
            return Self::from_secp256k1_bytes(&secret.to_bytes(), key_id);
        }
        if let Ok(secret) = k256::SecretKey::from_sec1_pem(pem) {
            return Self::from_secp256k1_bytes(&secret.to_bytes(), key_id);
        }
        if let Ok(signing_key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            return Self::from_ed25519_bytes(signing_key.as_bytes(), key_id);
        }
        Err(AuthError::Crypto(CryptoError::InvalidKey(
            "private key PEM is neither secp256k1 nor ed25519".into(),
        )))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Sign a 32-byte content hash, producing a fixed 64-byte signature.
    ///
    /// secp256k1 signs via ECDSA(SHA-256) and converts the DER output to
    /// R‖S; Ed25519 signs the hash directly.
    pub fn sign(&self, content_hash: &[u8]) -> Result<[u8; 64], AuthError> {
        match self.kind {
            KeyKind::Secp256k1 => {
                let der = crypto::secp256k1_sign(&self.private_key, content_hash)?;
                Ok(crypto::der_to_rs(&der)?)
            }
            KeyKind::Ed25519 => Ok(crypto::ed25519_sign(&self.private_key, content_hash)?),
        }
    }
}

/// Credentials of one local agent: its DID document plus private keys.
#[derive(Debug, Clone)]
pub struct DidCredentials {
    pub did: String,
    pub did_document: DidDocument,
    key_pairs: HashMap<String, DidKeyPair>,
}

impl DidCredentials {
    pub fn new(did_document: DidDocument) -> Self {
        Self {
            did: did_document.id.clone(),
            did_document,
            key_pairs: HashMap::new(),
        }
    }

    /// Register a key pair. Fails when the DID document carries a different
    /// public key for the same fragment.
    pub fn add_key_pair(&mut self, key_pair: DidKeyPair) -> Result<(), AuthError> {
        if let Some(vm) = self
            .did_document
            .verification_method_by_fragment(&key_pair.key_id)
        {
            let declared = vm.public_key_bytes()?;
            if declared != key_pair.public_key {
                return Err(AuthError::Crypto(CryptoError::InvalidKey(format!(
                    "public key derived from private key does not match #{} in the DID document",
                    key_pair.key_id
                ))));
            }
        }
        self.key_pairs.insert(key_pair.key_id.clone(), key_pair);
        Ok(())
    }

    pub fn get_key_pair(&self, key_id: &str) -> Option<&DidKeyPair> {
        self.key_pairs.get(key_id.trim_start_matches('#'))
    }

    /// Sign a content hash with the key behind a verification-method fragment.
    pub fn sign(&self, content_hash: &[u8], fragment: &str) -> Result<[u8; 64], AuthError> {
        let key_pair = self.get_key_pair(fragment).ok_or_else(|| {
            AuthError::KeyNotFound(format!("key pair for #{} not loaded", fragment))
        })?;
        key_pair.sign(content_hash)
    }
}

/// Per-request authentication parameters.
#[derive(Debug, Clone)]
pub struct AuthenticationContext {
    pub caller_did: String,
    /// Absent for one-way authentication.
    pub target_did: Option<String>,
    pub request_url: String,
    pub method: String,
    pub custom_headers: HashMap<String, String>,
    pub json_data: Option<Value>,
    pub use_two_way_auth: bool,
    /// Host of `request_url` without port or scheme.
    pub domain: Option<String>,
}

impl AuthenticationContext {
    pub fn new(caller_did: &str, target_did: Option<&str>, request_url: &str, method: &str) -> Self {
        Self {
            caller_did: caller_did.to_string(),
            target_did: target_did.map(str::to_string),
            request_url: request_url.to_string(),
            method: method.to_string(),
            custom_headers: HashMap::new(),
            json_data: None,
            use_two_way_auth: target_did.is_some(),
            domain: host_of(request_url),
        }
    }
}

/// Host portion of a URL, without port or scheme.
pub fn host_of(request_url: &str) -> Option<String> {
    url::Url::parse(request_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secp_document(did: &str) -> (DidDocument, k256::SecretKey) {
        let secret = k256::SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key().to_encoded_point(false);
        let multibase = multibase::encode(multibase::Base::Base58Btc, public.as_bytes());
        let doc = json!({
            "@context": "https://www.w3.org/ns/did/v1",
            "id": did,
            "verificationMethod": [{
                "id": format!("{}#key-1", did),
                "type": SECP256K1_KEY_TYPE,
                "controller": did,
                "publicKeyMultibase": multibase,
            }],
            "authentication": [format!("{}#key-1", did)],
        });
        (DidDocument::from_value(doc).unwrap(), secret)
    }

    #[test]
    fn parses_document_and_selects_first_authentication() {
        let (doc, _) = secp_document("did:wba:localhost%3A9527:wba:user:alice");
        assert_eq!(doc.first_authentication_fragment().unwrap(), "key-1");
        assert!(doc.verification_method_by_fragment("#key-1").is_some());
        assert!(doc.verification_method_by_fragment("key-2").is_none());
    }

    #[test]
    fn inline_authentication_method() {
        let did = "did:wba:localhost%3A9527:wba:user:bob";
        let secret = k256::SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key().to_encoded_point(false);
        let multibase = multibase::encode(multibase::Base::Base58Btc, public.as_bytes());
        let doc = json!({
            "id": did,
            "verificationMethod": [{
                "id": format!("{}#key-1", did),
                "type": SECP256K1_KEY_TYPE,
                "controller": did,
                "publicKeyMultibase": multibase.clone(),
            }],
            "authentication": [{
                "id": format!("{}#key-1", did),
                "type": SECP256K1_KEY_TYPE,
                "controller": did,
                "publicKeyMultibase": multibase,
            }],
        });
        let doc = DidDocument::from_value(doc).unwrap();
        assert_eq!(doc.first_authentication_fragment().unwrap(), "key-1");
    }

    #[test]
    fn jwk_and_multibase_must_agree() {
        let did = "did:wba:localhost%3A9527:wba:user:carol";
        let secret = k256::SecretKey::random(&mut rand::thread_rng());
        let point = secret.public_key().to_encoded_point(false);
        let multibase = multibase::encode(multibase::Base::Base58Btc, point.as_bytes());
        let x = crypto::b64url_encode(&point.as_bytes()[1..33]);
        let y = crypto::b64url_encode(&point.as_bytes()[33..65]);

        let consistent = VerificationMethod {
            id: format!("{}#key-1", did),
            key_type: SECP256K1_KEY_TYPE.to_string(),
            controller: did.to_string(),
            public_key_multibase: Some(multibase.clone()),
            public_key_jwk: Some(PublicKeyJwk {
                kty: "EC".into(),
                crv: "secp256k1".into(),
                x: x.clone(),
                y: Some(y),
            }),
        };
        assert_eq!(consistent.public_key_bytes().unwrap(), point.as_bytes());

        // Same x, wrong y: must be rejected.
        let other = k256::SecretKey::random(&mut rand::thread_rng());
        let other_point = other.public_key().to_encoded_point(false);
        let conflicting = VerificationMethod {
            public_key_jwk: Some(PublicKeyJwk {
                kty: "EC".into(),
                crv: "secp256k1".into(),
                x: crypto::b64url_encode(&other_point.as_bytes()[1..33]),
                y: Some(crypto::b64url_encode(&other_point.as_bytes()[33..65])),
            }),
            ..consistent
        };
        assert!(conflicting.public_key_bytes().is_err());
    }

    #[test]
    fn compressed_multibase_keys_normalize_to_uncompressed() {
        let did = "did:wba:localhost%3A9527:wba:user:dave";
        let secret = k256::SecretKey::random(&mut rand::thread_rng());
        let compressed = secret.public_key().to_encoded_point(true);
        let uncompressed = secret.public_key().to_encoded_point(false);
        let vm = VerificationMethod {
            id: format!("{}#key-1", did),
            key_type: SECP256K1_KEY_TYPE.to_string(),
            controller: did.to_string(),
            public_key_multibase: Some(multibase::encode(
                multibase::Base::Base58Btc,
                compressed.as_bytes(),
            )),
            public_key_jwk: None,
        };
        assert_eq!(vm.public_key_bytes().unwrap(), uncompressed.as_bytes());
    }

    #[test]
    fn key_pair_mismatch_fails_credentials_init() {
        let (doc, _) = secp_document("did:wba:localhost%3A9527:wba:user:erin");
        let mut credentials = DidCredentials::new(doc);
        // Key pair from a different private key than the document declares.
        let rogue = k256::SecretKey::random(&mut rand::thread_rng());
        let key_pair = DidKeyPair::from_secp256k1_bytes(&rogue.to_bytes(), "key-1").unwrap();
        assert!(credentials.add_key_pair(key_pair).is_err());
    }

    #[test]
    fn sign_with_matching_key_verifies() {
        let (doc, secret) = secp_document("did:wba:localhost%3A9527:wba:user:frank");
        let mut credentials = DidCredentials::new(doc);
        let key_pair = DidKeyPair::from_secp256k1_bytes(&secret.to_bytes(), "key-1").unwrap();
        let public = key_pair.public_key().to_vec();
        credentials.add_key_pair(key_pair).unwrap();

        let hash = crypto::sha256(b"payload");
        let rs = credentials.sign(&hash, "#key-1").unwrap();
        let der = crypto::rs_to_der(&rs).unwrap();
        assert!(crypto::secp256k1_verify(&public, &hash, &der));
    }

    #[test]
    fn context_derives_domain_without_port() {
        let ctx = AuthenticationContext::new(
            "did:wba:localhost%3A9527:wba:user:alice",
            Some("did:wba:localhost%3A9527:wba:user:bob"),
            "http://localhost:9527/agent/api/bob/demo",
            "POST",
        );
        assert_eq!(ctx.domain.as_deref(), Some("localhost"));
        assert!(ctx.use_two_way_auth);
    }
}
