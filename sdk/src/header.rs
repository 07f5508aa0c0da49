//! `DIDWba` Authorization header construction and parsing.
//!
//! Wire form:
//!
//! ```text
//! DIDWba did="…", nonce="…", timestamp="…", [resp_did="…", ]
//!        verification_method="#key-1", signature="<b64url(R||S)>"
//! ```
//!
//! The emitter writes fields in that fixed order; the parser accepts any
//! order but rejects duplicates and missing required fields. The signed
//! payload is the JCS canonicalization of `{nonce, timestamp, service, did}`
//! (plus `resp_did` in two-way mode), hashed with SHA-256.

use chrono::Utc;
use serde::Serialize;

use crate::crypto;
use crate::did::{host_of, AuthenticationContext, DidCredentials};
use crate::error::AuthError;

pub const WBA_SCHEME_PREFIX: &str = "DIDWba ";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parsed (or to-be-emitted) header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbaAuthHeader {
    pub did: String,
    pub nonce: String,
    pub timestamp: String,
    pub resp_did: Option<String>,
    /// Verification-method fragment, including the leading `#`.
    pub verification_method: String,
    /// Unpadded base64url of the 64-byte R‖S signature.
    pub signature: String,
}

impl WbaAuthHeader {
    /// Render the header value with the deterministic field order.
    pub fn to_header_value(&self) -> String {
        let mut fields = vec![
            format!("did=\"{}\"", self.did),
            format!("nonce=\"{}\"", self.nonce),
            format!("timestamp=\"{}\"", self.timestamp),
        ];
        if let Some(resp_did) = &self.resp_did {
            fields.push(format!("resp_did=\"{}\"", resp_did));
        }
        fields.push(format!("verification_method=\"{}\"", self.verification_method));
        fields.push(format!("signature=\"{}\"", self.signature));
        format!("{}{}", WBA_SCHEME_PREFIX, fields.join(", "))
    }

    /// Parse a header value. The scheme prefix must be exactly `DIDWba `.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let rest = header.strip_prefix(WBA_SCHEME_PREFIX).ok_or_else(|| {
            AuthError::HeaderParse("missing DIDWba scheme prefix".to_string())
        })?;

        let mut did = None;
        let mut nonce = None;
        let mut timestamp = None;
        let mut resp_did = None;
        let mut verification_method = None;
        let mut signature = None;

        for (key, value) in scan_fields(rest) {
            let slot = match key.as_str() {
                "did" => &mut did,
                "nonce" => &mut nonce,
                "timestamp" => &mut timestamp,
                "resp_did" => &mut resp_did,
                "verification_method" => &mut verification_method,
                "signature" => &mut signature,
                _ => continue,
            };
            if slot.is_some() {
                return Err(AuthError::HeaderParse(format!("duplicate field: {}", key)));
            }
            *slot = Some(value);
        }

        Ok(Self {
            did: required(did, "did")?,
            nonce: required(nonce, "nonce")?,
            timestamp: required(timestamp, "timestamp")?,
            resp_did,
            verification_method: required(verification_method, "verification_method")?,
            signature: required(signature, "signature")?,
        })
    }

    pub fn is_two_way(&self) -> bool {
        self.resp_did.is_some()
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, AuthError> {
    value.ok_or_else(|| AuthError::HeaderParse(format!("missing field: {}", name)))
}

/// Scan `key="value"` pairs, skipping separators and anything that does not
/// match the pair shape.
fn scan_fields(input: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = input.chars().collect();
    let mut pairs = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !(chars[i].is_alphanumeric() || chars[i] == '_') {
            i += 1;
            continue;
        }
        let key_start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();

        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j >= chars.len() || chars[j] != '=' {
            continue;
        }
        j += 1;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j >= chars.len() || chars[j] != '"' {
            continue;
        }
        j += 1;
        let value_start = j;
        while j < chars.len() && chars[j] != '"' {
            j += 1;
        }
        if j >= chars.len() {
            break;
        }
        let value: String = chars[value_start..j].iter().collect();
        pairs.push((key, value));
        i = j + 1;
    }
    pairs
}

#[derive(Serialize)]
struct SignedPayload<'a> {
    nonce: &'a str,
    timestamp: &'a str,
    service: &'a str,
    did: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resp_did: Option<&'a str>,
}

/// SHA-256 over the JCS canonical form of the signed payload.
pub fn signed_payload_hash(
    did: &str,
    nonce: &str,
    timestamp: &str,
    service: &str,
    resp_did: Option<&str>,
) -> Result<[u8; 32], AuthError> {
    let payload = SignedPayload {
        nonce,
        timestamp,
        service,
        did,
        resp_did,
    };
    let canonical = crypto::jcs_canonicalize(&payload)?;
    Ok(crypto::sha256(&canonical))
}

/// Build a signed `DIDWba` Authorization header for a request context.
pub fn build_auth_header(
    context: &AuthenticationContext,
    credentials: &DidCredentials,
) -> Result<String, AuthError> {
    let fragment = credentials.did_document.first_authentication_fragment()?;
    let nonce = crypto::generate_nonce();
    let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
    let service = host_of(&context.request_url).ok_or_else(|| {
        AuthError::HeaderParse(format!("request URL has no host: {}", context.request_url))
    })?;

    let resp_did = if context.use_two_way_auth {
        context.target_did.as_deref()
    } else {
        None
    };
    let content_hash =
        signed_payload_hash(&credentials.did, &nonce, &timestamp, &service, resp_did)?;
    let signature = credentials.sign(&content_hash, &fragment)?;

    let header = WbaAuthHeader {
        did: credentials.did.clone(),
        nonce,
        timestamp,
        resp_did: resp_did.map(str::to_string),
        verification_method: format!("#{}", fragment),
        signature: crypto::b64url_encode(&signature),
    };
    Ok(header.to_header_value())
}
