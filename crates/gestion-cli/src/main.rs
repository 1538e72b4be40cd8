//! Gestion CLI - Command-line session client
//!
//! Usage:
//!   gestion login --usuario <name>
//!   gestion get <path> --usuario <name>
//!   gestion watch --usuario <name>
//!
//! The password is read from `GESTION_PASSWORD` unless passed explicitly.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gestion_client::{ClientError, RefreshCoordinator, SessionEvent, SessionWatcher};
use gestion_core::{AppConfig, ClientConfig};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gestion")]
#[command(about = "Session client for the gestion API")]
#[command(version)]
struct Cli {
    /// API base URL (defaults to GESTION_BASE_URL or http://localhost:8080)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Credentials {
    /// Login identifier
    #[arg(long, env = "GESTION_USUARIO")]
    usuario: String,

    /// Password
    #[arg(long, env = "GESTION_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and show the authenticated principal
    Login {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Log in and GET a protected path, refreshing on 401
    Get {
        /// Path relative to the base URL, e.g. /api/auth/me
        path: String,
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Log in and keep the session alive until it expires or Ctrl-C
    Watch {
        #[command(flatten)]
        credentials: Credentials,
        /// Seconds between expiry checks
        #[arg(long)]
        interval: Option<u64>,
        /// Refresh this many seconds before the access token expires
        #[arg(long)]
        lead: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gestion_cli=info,gestion_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()
        .context("Invalid client configuration")?
        .client;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command {
        Commands::Login { credentials } => {
            let client = connect(&config, &credentials).await?;
            let principal = client.me().await?;
            println!("Logged in as {} (roles: {})", principal.id, principal.roles.join(", "));

            let session = client.session().await;
            if let Some(at) = session.access_expires_at {
                println!("Access token valid until {at}");
            }
            if let Some(at) = session.refresh_expires_at {
                println!("Refresh token valid until {at}");
            }
            logout(&client).await;
        }
        Commands::Get { path, credentials } => {
            let client = connect(&config, &credentials).await?;
            let response = client.get(&path).await?;
            println!("HTTP {}", response.status);
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.body),
            }
            logout(&client).await;
        }
        Commands::Watch {
            credentials,
            interval,
            lead,
        } => {
            if let Some(secs) = interval {
                config.watch_interval_secs = secs;
            }
            if let Some(secs) = lead {
                config.refresh_lead_secs = secs;
            }
            let client = connect(&config, &credentials).await?;
            watch(client, &config).await?;
        }
    }

    Ok(())
}

async fn connect(
    config: &ClientConfig,
    credentials: &Credentials,
) -> anyhow::Result<Arc<RefreshCoordinator>> {
    let client = Arc::new(RefreshCoordinator::from_config(config)?);
    match client.login(&credentials.usuario, &credentials.password).await {
        Ok(_) => Ok(client),
        Err(ClientError::Session(err)) => anyhow::bail!("Login failed: {}", err.user_message()),
        Err(err) => Err(err).context("Login failed"),
    }
}

async fn logout(client: &RefreshCoordinator) {
    if let Err(e) = client.logout().await {
        tracing::warn!(error = %e, "Logout failed");
    }
}

async fn watch(client: Arc<RefreshCoordinator>, config: &ClientConfig) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    let watcher = SessionWatcher::from_config(client.clone(), config).spawn();
    println!(
        "Watching session every {}s (refresh {}s before expiry)",
        config.watch_interval_secs, config.refresh_lead_secs
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Refreshed) => {
                    let session = client.session().await;
                    if let Some(at) = session.access_expires_at {
                        println!("Access token refreshed, valid until {at}");
                    }
                }
                Ok(SessionEvent::SessionExpired { redirect_to }) => {
                    println!("Session expired, log in again at {redirect_to}");
                    break;
                }
                Ok(event) => tracing::debug!(?event, "Session event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed session events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Logging out");
                logout(&client).await;
                break;
            }
        }
    }

    watcher.shutdown().await?;
    Ok(())
}
