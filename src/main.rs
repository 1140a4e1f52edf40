use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::{Json, Router, extract::FromRef, routing::get};
use serde::Serialize;
use serde_json::{Value, json};

mod audit;
mod auth;
mod config;
mod middleware;
mod telemetry;

use auth::{Authenticated, HttpKeySetFetcher, KeySetCache, SystemClock, TokenVerifier};

#[derive(Clone, FromRef)]
pub struct AppState {
    settings: Arc<config::Settings>,
    verifier: Arc<TokenVerifier>,
}

#[derive(Debug, Serialize)]
struct Me {
    sub: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load_config().context("failed to load configuration")?;
    let _otel_guard =
        telemetry::init(&settings.telemetry).context("failed to initialize telemetry")?;

    let verifier = build_verifier(&settings)?;
    if verifier.is_bypassed() {
        tracing::warn!("TESTING is enabled: every request is authenticated as the test user");
    } else if settings.auth0_domain.is_none() || settings.auth0_audience.is_none() {
        tracing::error!("AUTH0_DOMAIN / AUTH0_AUDIENCE missing: protected routes will fail");
    }

    let shared_state = AppState {
        settings: Arc::new(settings),
        verifier: Arc::new(verifier),
    };

    let addr = SocketAddr::new(
        shared_state.settings.bind_address,
        shared_state.settings.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app(shared_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

fn build_verifier(settings: &config::Settings) -> anyhow::Result<TokenVerifier> {
    let fetcher = HttpKeySetFetcher::new(settings.key_set.fetch_timeout())
        .context("failed to build JWKS HTTP client")?;
    let key_sets = KeySetCache::new(
        settings.auth0_domain.clone(),
        settings.key_set.ttl(),
        Arc::new(fetcher),
        Arc::new(SystemClock),
    );
    Ok(TokenVerifier::new(settings.verifier_config(), key_sets))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/me", get(me))
        .layer(middleware::RequestContextLayer)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn me(Authenticated(claims): Authenticated) -> Json<Me> {
    Json(Me { sub: claims.sub })
}
