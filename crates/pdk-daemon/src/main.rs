//! pdk-daemon entry point.
//!
//! Thin on purpose: load config, connect the mirror, build the engine, wire
//! middleware and serve. Handlers live in `routes.rs`, shared state in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pdk_audit::OperationLog;
use pdk_config::DeskConfig;
use pdk_daemon::{routes, state};
use pdk_gateway::HttpGatewayFactory;
use pdk_reconcile::{Engine, EngineConfig, PgMirror};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Comma-separated layered config paths; later files override earlier ones.
const ENV_CONFIG_PATHS: &str = "PDK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = pdk_config::load_layered_yaml(&path_refs)?;
    let cfg = DeskConfig::from_loaded(&loaded)?;
    info!(config_hash = %loaded.config_hash, paths = ?paths, "config loaded");

    let secrets = pdk_config::resolve_secrets(&loaded.config_json, true)?;
    let pool = pdk_db::connect(secrets.require_database_url()?).await?;
    pdk_db::migrate(&pool).await?;

    let gateways = HttpGatewayFactory::new(&cfg.gateway.base_url, Duration::from_secs(cfg.gateway.timeout_secs))
        .context("build marketplace http client")?;
    let engine = Engine::new(
        Arc::new(PgMirror::new(pool)),
        Arc::new(gateways),
        EngineConfig {
            action_price_bps: cfg.engine.action_price_bps,
            pending_grace_secs: cfg.engine.pending_grace_secs,
        },
    );

    let journal = match cfg.audit.path.as_deref() {
        Some(path) => {
            let log = OperationLog::open(path, cfg.audit.hash_chain)?;
            info!(path, next_seq = log.next_seq(), "operation log open");
            state::OperationJournal::new(log)
        }
        None => state::OperationJournal::disabled(),
    };

    let shared = Arc::new(state::AppState::new(engine, journal));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env()
        .or_else(|| cfg.daemon.addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("pdk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
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

fn config_paths() -> Vec<String> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![DEFAULT_CONFIG_PATH.to_string()],
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PDK_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No handler available; serve until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
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
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
