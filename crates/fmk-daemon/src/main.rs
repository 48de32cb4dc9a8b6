//! fmk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, builds
//! the shared state over a Postgres store, wires middleware, and starts the
//! HTTP server. All route handlers live in `routes.rs`; all shared state
//! types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use fmk_audit::TransitionJournal;
use fmk_config::DaemonSettings;
use fmk_daemon::{auth::JwtKeys, routes, state};
use fmk_db::PgStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = load_settings()?;

    let db_url = std::env::var(&settings.db_url_env)
        .with_context(|| format!("missing env var {}", settings.db_url_env))?;
    let pool = fmk_db::connect(&db_url).await?;
    fmk_db::migrate(&pool).await?;
    let store = Arc::new(PgStore::new(pool));

    let jwt = JwtKeys::from_env(&settings.jwt_secret_env)?;

    let mut shared = state::AppState::new(store, jwt);
    if let Some(path) = &settings.journal_path {
        shared = shared.with_journal(TransitionJournal::open(
            path,
            settings.journal_hash_chain,
        )?);
        info!("transition journal at {path}");
    }
    let shared = Arc::new(shared);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {}", settings.bind_addr))?;
    info!("fmk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Config layers come from FMK_CONFIG (comma-separated paths, merge order);
/// no config files means defaults.
fn load_settings() -> anyhow::Result<DaemonSettings> {
    match std::env::var("FMK_CONFIG") {
        Ok(paths) => {
            let paths: Vec<&str> = paths.split(',').map(str::trim).collect();
            let loaded = fmk_config::load_layered_json(&paths)?;
            info!(config_hash = %loaded.config_hash, "config loaded");
            DaemonSettings::from_config(&loaded.config_json)
        }
        Err(_) => Ok(DaemonSettings::default()),
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
