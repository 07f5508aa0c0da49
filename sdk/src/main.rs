use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::time::{interval, Duration};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anp_sdk::{auth_middleware, AuthConfig, AuthServerState, KeyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Default to warn in production, debug in development
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }

        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting ANP agent daemon");

    let config = AuthConfig::from_env();
    tracing::info!(
        nonce_expire_minutes = config.nonce_expire_minutes,
        token_expire_seconds = config.token_expire_seconds,
        jwt_algorithm = %config.jwt_algorithm,
        user_did_path = %config.user_did_path.display(),
        "Authentication configuration loaded"
    );

    let keystore = Arc::new(KeyStore::load(&config.user_did_path)?);
    tracing::info!(users = keystore.len(), "User keystore loaded");

    let state = AuthServerState::new(config, keystore);

    // Spawn nonce/token purge worker
    let purge_nonces = state.nonce_store.clone();
    let purge_tokens = state.token_store.clone();
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(60));
        loop {
            interval_timer.tick().await;
            purge_nonces.purge_expired();
            purge_tokens.purge_expired();
            tracing::debug!("Nonce and token store purge completed");
        }
    });
    tracing::info!("Store purge worker started");

    let app = build_router(state);

    let port = std::env::var("ANP_PORT")
        .unwrap_or_else(|_| "9527".to_string())
        .parse::<u16>()
        .unwrap_or(9527);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Agent daemon listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AuthServerState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/wba/user/{user_id}/did.json", get(serve_did_document))
        .route("/agent/api/{*rest}", post(agent_echo).get(agent_echo))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(json!({ "service": "anp-agentd", "status": "ok" }))
}

/// Publish hosted users' DID documents so peers can resolve them. The path
/// is covered by the `/wba/user/*` exemption.
async fn serve_did_document(
    State(state): State<AuthServerState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let entry = state
        .keystore
        .dids()
        .find(|did| did.ends_with(&format!(":{}", user_id)))
        .and_then(|did| state.keystore.get(did));
    match entry {
        Some(entry) => Json(entry.raw_did_document.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "unknown user" })),
        )
            .into_response(),
    }
}

/// Demo protected endpoint: echoes the path and body back to the caller.
async fn agent_echo(Path(rest): Path<String>, body: axum::body::Bytes) -> impl IntoResponse {
    let echo: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!(null));
    Json(json!({
        "status": "ok",
        "path": rest,
        "echo": echo,
    }))
}

async fn _dummy_mw(
    axum::extract::State(_s): axum::extract::State<AuthServerState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    next.run(req).await
}

#[allow(dead_code)]
fn _assert_future_send() {
    let state = AuthServerState::new(AuthConfig::default(), std::sync::Arc::new(KeyStore::empty()));
    let router: Router = Router::new()
        .route("/", get(root))
        .layer(axum::middleware::from_fn_with_state(state.clone(), _dummy_mw))
        .with_state(state);
    let _ = router;
}
