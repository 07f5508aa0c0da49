//! Environment-driven configuration, parsed once at startup.

use std::path::PathBuf;

/// URL path patterns that bypass authentication entirely.
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &[
    "/docs",
    "/anp-nlp/",
    "/ws/",
    "/publisher/agents",
    "/agent/group/*",
    "/redoc",
    "/openapi.json",
    "/wba/hostuser/*",
    "/wba/user/*",
    "/",
    "/favicon.ico",
    "/agents/example/ad.json",
    "/wba/auth",
];

/// DID patterns resolved over plain http.
pub const DEFAULT_INSECURE_PATTERNS: &[&str] = &[
    "did:wba:localhost*",
    "did:wba:localhost%3A*",
    "did:wba:127.0.0.1*",
    "did:wba:127.0.0.1%3A*",
];

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Timestamp window and nonce TTL, in minutes.
    pub nonce_expire_minutes: i64,
    /// Access-token TTL, in seconds.
    pub token_expire_seconds: i64,
    pub jwt_algorithm: String,
    /// Directory scanned for per-user DID documents and keys.
    pub user_did_path: PathBuf,
    pub insecure_patterns: Vec<String>,
    pub exempt_paths: Vec<String>,
    /// Accept the legacy single-object two-way response form on the wire.
    pub accept_legacy_response: bool,
    /// Resolver cache TTL, in seconds.
    pub resolver_cache_seconds: u64,
    /// Per-DID request quota per second for the middleware backstop.
    pub rate_limit_per_second: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_expire_minutes: 5,
            token_expire_seconds: 3600,
            jwt_algorithm: "RS256".to_string(),
            user_did_path: PathBuf::from("./data/anp_users"),
            insecure_patterns: DEFAULT_INSECURE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|s| s.to_string()).collect(),
            accept_legacy_response: true,
            resolver_cache_seconds: 300,
            rate_limit_per_second: 100,
        }
    }
}

impl AuthConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nonce_expire_minutes: env_parse("ANP_NONCE_EXPIRE_MINUTES", defaults.nonce_expire_minutes),
            token_expire_seconds: env_parse("ANP_TOKEN_EXPIRE_TIME", defaults.token_expire_seconds),
            jwt_algorithm: std::env::var("ANP_JWT_ALGORITHM")
                .unwrap_or(defaults.jwt_algorithm),
            user_did_path: std::env::var("ANP_USER_DID_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.user_did_path),
            insecure_patterns: env_list("ANP_INSECURE_PATTERNS", defaults.insecure_patterns),
            exempt_paths: env_list("ANP_EXEMPT_PATHS", defaults.exempt_paths),
            accept_legacy_response: env_parse(
                "ANP_ACCEPT_LEGACY_RESPONSE",
                defaults.accept_legacy_response,
            ),
            resolver_cache_seconds: env_parse(
                "ANP_RESOLVER_CACHE_SECONDS",
                defaults.resolver_cache_seconds,
            ),
            rate_limit_per_second: env_parse(
                "ANP_RATE_LIMIT_PER_SECOND",
                defaults.rate_limit_per_second,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(var: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AuthConfig::default();
        assert_eq!(config.nonce_expire_minutes, 5);
        assert_eq!(config.jwt_algorithm, "RS256");
        assert!(config.exempt_paths.iter().any(|p| p == "/docs"));
        assert!(config
            .insecure_patterns
            .iter()
            .any(|p| p.starts_with("did:wba:localhost")));
    }
}
