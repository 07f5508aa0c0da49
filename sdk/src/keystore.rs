//! Local user-data store: credentials and JWT keys loaded once at startup.
//!
//! Each user folder under the configured path carries:
//!
//! ```text
//! <user>/did_document.json     DID document
//! <user>/<key-id>_private.pem  DID signing key (secp256k1 or ed25519)
//! <user>/private_key.pem       RSA private key for token issuance
//! <user>/public_key.pem        RSA public key for token validation
//! ```
//!
//! Folders that fail to load are skipped with a warning; the map is immutable
//! after load and shared by reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::crypto::redact_for_log;
use crate::did::{DidCredentials, DidDocument, DidKeyPair};
use crate::error::AuthError;

pub const DID_DOCUMENT_FILE: &str = "did_document.json";
pub const JWT_PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const JWT_PUBLIC_KEY_FILE: &str = "public_key.pem";

/// One hosted agent: credentials plus the RSA keys backing token issuance.
pub struct UserEntry {
    pub did: String,
    pub credentials: DidCredentials,
    pub raw_did_document: Value,
    pub jwt_private_key_pem: Option<String>,
    pub jwt_public_key_pem: Option<String>,
    pub user_dir: PathBuf,
}

/// Immutable map of local agents keyed by DID.
pub struct KeyStore {
    users: HashMap<String, Arc<UserEntry>>,
}

impl KeyStore {
    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Scan a user-data directory. Missing directories yield an empty store;
    /// unreadable user folders are skipped.
    pub fn load(dir: &Path) -> Result<Self, AuthError> {
        let mut users = HashMap::new();
        if !dir.exists() {
            warn!(path = %dir.display(), "User DID path does not exist; starting with empty keystore");
            return Ok(Self { users });
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| AuthError::Internal(format!("cannot read user DID path: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Self::load_user(&path) {
                Ok(user) => {
                    debug!(
                        did = %redact_for_log(&user.did),
                        dir = %path.display(),
                        "Loaded user credentials"
                    );
                    users.insert(user.did.clone(), Arc::new(user));
                }
                Err(e) => {
                    warn!(dir = %path.display(), error = %e, "Skipping unreadable user folder");
                }
            }
        }
        Ok(Self { users })
    }

    fn load_user(user_dir: &Path) -> Result<UserEntry, AuthError> {
        let doc_path = user_dir.join(DID_DOCUMENT_FILE);
        let doc_text = std::fs::read_to_string(&doc_path)
            .map_err(|e| AuthError::Internal(format!("{}: {}", doc_path.display(), e)))?;
        let raw: Value = serde_json::from_str(&doc_text)
            .map_err(|e| AuthError::Internal(format!("{}: {}", doc_path.display(), e)))?;
        let document = DidDocument::from_value(raw.clone())?;

        let key_id = document.first_authentication_fragment()?;
        let key_path = user_dir.join(format!("{}_private.pem", key_id));
        let key_pem = std::fs::read_to_string(&key_path)
            .map_err(|e| AuthError::Internal(format!("{}: {}", key_path.display(), e)))?;
        let key_pair = DidKeyPair::from_pem(&key_pem, &key_id)?;

        let mut credentials = DidCredentials::new(document);
        credentials.add_key_pair(key_pair)?;

        let jwt_private_key_pem = std::fs::read_to_string(user_dir.join(JWT_PRIVATE_KEY_FILE)).ok();
        let jwt_public_key_pem = std::fs::read_to_string(user_dir.join(JWT_PUBLIC_KEY_FILE)).ok();

        Ok(UserEntry {
            did: credentials.did.clone(),
            credentials,
            raw_did_document: raw,
            jwt_private_key_pem,
            jwt_public_key_pem,
            user_dir: user_dir.to_path_buf(),
        })
    }

    pub fn get(&self, did: &str) -> Option<Arc<UserEntry>> {
        self.users.get(did).cloned()
    }

    pub fn dids(&self) -> impl Iterator<Item = &String> {
        self.users.keys()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
