// Agentdash API server
// Decision: No DATABASE_URL means in-memory dev mode; history is lost on restart
// Decision: Sessions are restored from the store before accepting traffic

use agentdash_api::services::spawn_idle_sweeper;
use agentdash_api::{build_app, AppContext, ServerConfig};
use agentdash_core::BroadcastHub;
use agentdash_storage::StorageBackend;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via RUST_LOG (default: "agentdash_api=debug,tower_http=debug")
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentdash_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("agentdash-api starting...");

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    let backend = StorageBackend::from_database_url(config.database_url.as_deref())
        .await
        .context("Failed to initialize event store")?;
    let storage_mode = if backend.is_dev_mode() {
        tracing::warn!("DATABASE_URL not set, using in-memory event store (dev mode)");
        "memory"
    } else {
        tracing::info!("Connected to database");
        "postgres"
    };

    let ctx = AppContext::new(Arc::new(backend), storage_mode, &config);
    let restored = ctx
        .restore_sessions()
        .await
        .context("Failed to restore sessions from event store")?;
    tracing::info!(sessions = restored, "Session registry restored");

    let _sweeper = spawn_idle_sweeper(
        ctx.registry.clone(),
        ctx.hub.clone(),
        config.idle_sweep_interval,
    );

    let app = build_app(&ctx, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctx.hub.clone()))
        .await
        .context("Server error")?;

    tracing::info!("agentdash-api stopped");
    Ok(())
}

/// Resolve on Ctrl-C, then end every live stream so connections can drain.
async fn shutdown_signal(hub: BroadcastHub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(
        subscribers = hub.subscriber_count(),
        "Shutdown requested, closing streams"
    );
    hub.close_all();
}
