mod access;
mod auth;
mod backend;
mod clock;
mod config;
mod errors;
mod fence;
mod models;
mod resources;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::AuthContext;
use crate::backend::{seed, Backend, RestBackend};
use crate::config::{BackendTarget, Config};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TalentPool app shell v{}", env!("CARGO_PKG_VERSION"));

    let backend = connect_backend(&config).await?;
    info!("Backend client initialized ({})", backend.backend_tag());

    // Process-wide auth context; torn down after the server stops
    let auth = AuthContext::init(backend).await;

    let state = AppState::new(config.clone(), auth.clone());

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    auth.shutdown().await;
    info!("Auth context shut down");
    Ok(())
}

/// Hosted Supabase project, or the seeded in-memory backend in offline mode.
async fn connect_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    match &config.backend {
        BackendTarget::Supabase { url, anon_key } => {
            let timeout = Duration::from_secs(config.http_timeout_secs);
            Ok(Arc::new(RestBackend::new(url, anon_key, timeout)?))
        }
        BackendTarget::Offline => {
            info!("Offline mode: using seeded in-memory backend");
            let server = seed::demo_server().await?;
            Ok(Arc::new(server.connect()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
