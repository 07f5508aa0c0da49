//! DID document resolution: local user data first, then the network.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::crypto::redact_for_log;
use crate::did::DidDocument;
use crate::error::AuthError;
use crate::keystore::KeyStore;
use crate::matcher::matches_any;

/// Parse host and port out of a `did:wba` identifier. Accepts
/// `did:wba:host%3Aport:…`, `did:wba:host:port:…`, and bare-host forms
/// (port defaults to 80).
pub fn parse_wba_did_host_port(did: &str) -> Option<(String, u16)> {
    let mut parts = did.split(':');
    if parts.next() != Some("did") || parts.next() != Some("wba") {
        return None;
    }
    let host_part = parts.next()?;
    if host_part.is_empty() {
        return None;
    }
    if let Some((host, port)) = host_part.split_once("%3A") {
        return port.parse().ok().map(|p| (host.to_string(), p));
    }
    // Unescaped `did:wba:host:port:…` form.
    if let Some(next) = parts.clone().next() {
        if let Ok(port) = next.parse::<u16>() {
            return Some((host_part.to_string(), port));
        }
    }
    Some((host_part.to_string(), 80))
}

/// Resolves DID documents, consulting local user data before the network.
/// Network lookups are a single GET with no retry; resolved documents are
/// cached with a TTL.
pub struct DidResolver {
    keystore: Arc<KeyStore>,
    http: reqwest::Client,
    cache: Cache<String, Arc<DidDocument>>,
    insecure_patterns: Vec<String>,
}

impl DidResolver {
    pub fn new(keystore: Arc<KeyStore>, insecure_patterns: Vec<String>, cache_ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            keystore,
            http,
            cache,
            insecure_patterns,
        }
    }

    /// Resolve a DID document. Returns `None` on any failure; callers treat
    /// an unresolvable DID as a rejection.
    pub async fn resolve(&self, did: &str) -> Option<Arc<DidDocument>> {
        if let Some(cached) = self.cache.get(did).await {
            debug!(did = %redact_for_log(did), "DID document cache hit");
            return Some(cached);
        }

        let document = match self.resolve_uncached(did).await {
            Ok(doc) => Arc::new(doc),
            Err(e) => {
                debug!(did = %redact_for_log(did), error = %e, "DID resolution failed");
                return None;
            }
        };
        self.cache.insert(did.to_string(), document.clone()).await;
        Some(document)
    }

    async fn resolve_uncached(&self, did: &str) -> Result<DidDocument, AuthError> {
        // Local user data wins over the network.
        if let Some(entry) = self.keystore.get(did) {
            return DidDocument::from_value(entry.raw_did_document.clone());
        }

        let url = self.document_url(did)?;
        debug!(did = %redact_for_log(did), url = %url, "Fetching DID document");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::DidResolve(format!("HTTP error: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::DidResolve(format!(
                "document endpoint returned status {}",
                response.status()
            )));
        }
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::DidResolve(format!("malformed document body: {}", e)))?;
        DidDocument::from_value(value)
    }

    /// Derive the document URL for a `did:wba` identifier:
    /// `<scheme>://<host[:port]>/<segments>/did.json`, `%3A` decoded to `:`.
    /// DIDs matching the insecure patterns fetch over plain http.
    pub fn document_url(&self, did: &str) -> Result<String, AuthError> {
        let parts: Vec<&str> = did.split(':').collect();
        if parts.len() < 4 || parts[0] != "did" || parts[1] != "wba" {
            return Err(AuthError::DidResolve(format!("invalid wba DID: {}", did)));
        }
        let authority = urlencoding::decode(parts[2])
            .map_err(|e| AuthError::DidResolve(format!("invalid DID host: {}", e)))?
            .into_owned();
        // An unescaped numeric segment right after the host is a port.
        let (authority, segments) = match parts[3].parse::<u16>() {
            Ok(port) if parts.len() > 4 && !authority.contains(':') => {
                (format!("{}:{}", authority, port), &parts[4..])
            }
            _ => (authority, &parts[3..]),
        };
        if segments.is_empty() {
            return Err(AuthError::DidResolve(format!(
                "wba DID carries no path segments: {}",
                did
            )));
        }
        let scheme = if matches_any(&self.insecure_patterns, did) {
            "http"
        } else {
            "https"
        };
        Ok(format!(
            "{}://{}/{}/did.json",
            scheme,
            authority,
            segments.join("/")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INSECURE_PATTERNS;

    fn resolver() -> DidResolver {
        DidResolver::new(
            Arc::new(KeyStore::empty()),
            DEFAULT_INSECURE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            60,
        )
    }

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_wba_did_host_port("did:wba:localhost%3A9527:wba:user:alice"),
            Some(("localhost".into(), 9527))
        );
        assert_eq!(
            parse_wba_did_host_port("did:wba:localhost:9527:wba:user:alice"),
            Some(("localhost".into(), 9527))
        );
        assert_eq!(
            parse_wba_did_host_port("did:wba:agents.example.com:wba:user:alice"),
            Some(("agents.example.com".into(), 80))
        );
        assert_eq!(parse_wba_did_host_port("did:web:example.com"), None);
    }

    #[test]
    fn derives_document_url_with_escaped_port() {
        let r = resolver();
        assert_eq!(
            r.document_url("did:wba:localhost%3A9527:wba:user:alice").unwrap(),
            "http://localhost:9527/wba/user/alice/did.json"
        );
    }

    #[test]
    fn derives_document_url_for_public_host() {
        let r = resolver();
        assert_eq!(
            r.document_url("did:wba:agents.example.com:wba:user:alice").unwrap(),
            "https://agents.example.com/wba/user/alice/did.json"
        );
    }

    #[test]
    fn rejects_non_wba_dids() {
        let r = resolver();
        assert!(r.document_url("did:web:example.com:user").is_err());
        assert!(r.document_url("did:wba:hostonly").is_err());
    }

    #[tokio::test]
    async fn local_lookup_wins_and_network_failure_is_none() {
        // Unresolvable host: resolve() must swallow the error and return None.
        let r = resolver();
        assert!(r
            .resolve("did:wba:nonexistent.invalid%3A1:wba:user:ghost")
            .await
            .is_none());
    }
}
