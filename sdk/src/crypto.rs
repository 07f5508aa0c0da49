//! Crypto primitives for the WBA authentication scheme.
//!
//! secp256k1 signatures travel as fixed-length 64-byte R‖S on the wire but
//! are DER-encoded at the ECDSA boundary; the converters here are the single
//! place that transformation happens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use k256::ecdsa::signature::{Signer, Verifier};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Canonicalization failed: {0}")]
    Canonicalize(String),
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RFC 8785 canonical JSON bytes of a serializable value.
pub fn jcs_canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, CryptoError> {
    serde_json_canonicalizer::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| CryptoError::Canonicalize(e.to_string()))
}

/// Unpadded URL-safe base64.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe base64, tolerating padded input.
pub fn b64url_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidEncoding(format!("base64url: {}", e)))
}

/// Decode a multibase string; only `z` (base58-btc) is accepted.
pub fn multibase_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    let (base, bytes) = multibase::decode(input)
        .map_err(|e| CryptoError::InvalidEncoding(format!("multibase: {}", e)))?;
    if base != multibase::Base::Base58Btc {
        return Err(CryptoError::InvalidEncoding(format!(
            "unsupported multibase prefix: {:?}",
            base
        )));
    }
    Ok(bytes)
}

/// Convert a DER ECDSA signature to fixed-length 64-byte R‖S.
pub fn der_to_rs(der: &[u8]) -> Result<[u8; 64], CryptoError> {
    let sig = k256::ecdsa::Signature::from_der(der)
        .map_err(|e| CryptoError::InvalidSignature(format!("der: {}", e)))?;
    let mut rs = [0u8; 64];
    rs.copy_from_slice(&sig.to_bytes());
    Ok(rs)
}

/// Convert a 64-byte R‖S signature to DER. Rejects r=0, s=0, and wrong length.
pub fn rs_to_der(rs: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if rs.len() != 64 {
        return Err(CryptoError::InvalidSignature(format!(
            "expected 64-byte R||S, got {}",
            rs.len()
        )));
    }
    let sig = k256::ecdsa::Signature::from_slice(rs)
        .map_err(|e| CryptoError::InvalidSignature(format!("r||s: {}", e)))?;
    Ok(sig.to_der().as_bytes().to_vec())
}

/// ECDSA(SHA-256) over `msg` with a raw 32-byte secp256k1 private key; DER output.
pub fn secp256k1_sign(private_key: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signing_key = k256::ecdsa::SigningKey::from_slice(private_key)
        .map_err(|e| CryptoError::InvalidKey(format!("secp256k1 private key: {}", e)))?;
    let sig: k256::ecdsa::Signature = signing_key.sign(msg);
    Ok(sig.to_der().as_bytes().to_vec())
}

/// Verify a DER ECDSA(SHA-256) signature against a SEC1 public key (33 or 65 bytes).
pub fn secp256k1_verify(public_key: &[u8], msg: &[u8], der: &[u8]) -> bool {
    let Ok(verifying_key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = k256::ecdsa::Signature::from_der(der) else {
        return false;
    };
    verifying_key.verify(msg, &sig).is_ok()
}

/// Ed25519 signature over the raw message; 64-byte output.
pub fn ed25519_sign(private_key: &[u8], msg: &[u8]) -> Result<[u8; 64], CryptoError> {
    let key_bytes: [u8; 32] = private_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("ed25519 private key must be 32 bytes".into()))?;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&key_bytes);
    Ok(signing_key.sign(msg).to_bytes())
}

/// Verify an Ed25519 signature over the raw message.
pub fn ed25519_verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(msg, &sig).is_ok()
}

/// 16 random bytes, hex encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a value for logging/privacy (8-byte truncated SHA256)
pub fn hash_for_log(input: &str) -> String {
    let digest = sha256(input.as_bytes());
    format!(
        "{:x}",
        digest[..8].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    )
}

/// Redact a sensitive value for logs by returning a short, non-reversible tag
pub fn redact_for_log(value: &str) -> String {
    format!("h:{}", hash_for_log(value))
}
