#![warn(missing_docs)]

//! Blocker HTTP server: signed REST access to a [`blocker_core::BlockEngine`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;

pub use api::{router, AppState, Limits};
pub use config::ServerConfig;
pub use error::ApiError;

use anyhow::Context;
use blocker_core::BlockEngine;

/// Resolve every backend, bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let engine = BlockEngine::from_config(&config.blocker)
        .await
        .context("failed to initialize block engine")?;
    let shared_key = config.resolve_shared_key()?;
    let limits = Limits {
        timeout: config.request_timeout(),
        max_body_bytes: config.max_upload_bytes,
    };
    let app = router(AppState::new(engine, shared_key), limits);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Blocker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Blocker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
