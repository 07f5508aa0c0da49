//! Issued-token cache and the client-side remote-token mirror.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A token this agent issued to a remote caller.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub peer_did: String,
}

impl IssuedToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Process-wide cache of issued tokens, keyed by (caller DID, target DID).
/// Reads hand out cloned snapshots; updates hold only the shard lock.
#[derive(Default)]
pub struct TokenStore {
    tokens: DashMap<(String, String), IssuedToken>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued token. Overwrites any prior entry for the pair.
    pub fn store(
        &self,
        caller_did: &str,
        target_did: &str,
        token: &str,
        ttl_seconds: i64,
    ) -> IssuedToken {
        let now = Utc::now();
        let issued = IssuedToken {
            token: token.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            is_revoked: false,
            peer_did: caller_did.to_string(),
        };
        self.tokens.insert(
            (caller_did.to_string(), target_did.to_string()),
            issued.clone(),
        );
        issued
    }

    pub fn get(&self, caller_did: &str, target_did: &str) -> Option<IssuedToken> {
        self.tokens
            .get(&(caller_did.to_string(), target_did.to_string()))
            .map(|entry| entry.clone())
    }

    /// Mark a token revoked; subsequent bearer checks fail until reissue.
    pub fn revoke(&self, caller_did: &str, target_did: &str) -> bool {
        match self
            .tokens
            .get_mut(&(caller_did.to_string(), target_did.to_string()))
        {
            Some(mut entry) => {
                entry.is_revoked = true;
                true
            }
            None => false,
        }
    }

    /// Drop expired and revoked entries.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.tokens
            .retain(|_, token| !token.is_revoked && !token.is_expired_at(now));
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A token a remote agent issued to us. Kept for follow-up bearer calls and
/// diagnostics.
#[derive(Debug, Clone)]
pub struct RemoteToken {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub issuer_did: String,
}

/// Client-side mirror of tokens received from remote agents, keyed by the
/// issuing agent's DID.
#[derive(Default)]
pub struct RemoteTokenStore {
    tokens: DashMap<String, RemoteToken>,
}

impl RemoteTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, issuer_did: &str, token: &str) {
        self.tokens.insert(
            issuer_did.to_string(),
            RemoteToken {
                token: token.to_string(),
                created_at: Utc::now(),
                issuer_did: issuer_did.to_string(),
            },
        );
    }

    pub fn get(&self, issuer_did: &str) -> Option<RemoteToken> {
        self.tokens.get(issuer_did).map(|entry| entry.clone())
    }

    pub fn revoke(&self, issuer_did: &str) {
        self.tokens.remove(issuer_did);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "did:wba:localhost%3A9527:wba:user:alice";
    const BOB: &str = "did:wba:localhost%3A9527:wba:user:bob";

    #[test]
    fn store_and_get_roundtrip() {
        let store = TokenStore::new();
        let issued = store.store(ALICE, BOB, "jwt-token", 60);
        assert!(issued.expires_at > issued.created_at);

        let fetched = store.get(ALICE, BOB).unwrap();
        assert_eq!(fetched.token, "jwt-token");
        assert_eq!(fetched.peer_did, ALICE);
        assert!(store.get(BOB, ALICE).is_none());
    }

    #[test]
    fn revoked_tokens_are_flagged_and_purged() {
        let store = TokenStore::new();
        store.store(ALICE, BOB, "jwt-token", 60);
        assert!(store.revoke(ALICE, BOB));
        assert!(store.get(ALICE, BOB).unwrap().is_revoked);

        store.purge_expired();
        assert!(store.get(ALICE, BOB).is_none());
    }

    #[test]
    fn expired_tokens_detected() {
        let store = TokenStore::new();
        let issued = store.store(ALICE, BOB, "jwt-token", 0);
        assert!(issued.is_expired_at(Utc::now() + Duration::seconds(1)));

        let store2 = TokenStore::new();
        store2.store(ALICE, BOB, "t", -1);
        store2.purge_expired();
        assert!(store2.is_empty());
    }

    #[test]
    fn remote_tokens_keyed_by_issuer() {
        let store = RemoteTokenStore::new();
        store.store(BOB, "issued-by-bob");
        assert_eq!(store.get(BOB).unwrap().token, "issued-by-bob");
        store.revoke(BOB);
        assert!(store.get(BOB).is_none());
    }
}
