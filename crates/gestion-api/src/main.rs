//! Gestion API Server
//!
//! Session and token server for the gestion administrative application.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use gestion_api::{
    auth::{CredentialStore, PgCredentialStore},
    create_router,
    state::AppState,
};
use gestion_core::{AppConfig, LoggingConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    config.validate().context("Invalid configuration")?;
    if config.auth.uses_development_secrets() {
        if config.server.production {
            anyhow::bail!("JWT_SECRET and JWT_REFRESH_TOKEN must be set in production");
        }
        tracing::warn!("Using development token secrets; set JWT_SECRET and JWT_REFRESH_TOKEN");
    }

    // Connect to the credential store; the pool lives until shutdown
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgCredentialStore::new(pool));
    store.migrate().await.context("Failed to apply migrations")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, store.clone()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gestion API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    tracing::info!("Credential store closed");

    Ok(())
}

/// `GESTION_CONFIG` points at an optional TOML file; the environment wins over it
fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("GESTION_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("Failed to load {path}"))?
            .with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let level = &logging.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("gestion_api={level},gestion_core={level},tower_http={level},audit=info").into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Gracefully shutdown");
}
