//! starline-ip - Interview Pipeline microservice
//!
//! **Module Identity:**
//! - Name: starline-ip (Interview Pipeline)
//! - Port: 5740
//!
//! Runs interviews: entitlement-gated answer submission, question
//! sequencing and answer evaluation against an external evaluator.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use starline_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use starline_common::db::init_database;
use starline_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use starline_ip::config::{build_evaluator, PipelineSettings};
use starline_ip::{build_router, AppState};

const MODULE_NAME: &str = "starline-ip";

/// Command-line arguments for starline-ip
#[derive(Parser, Debug)]
#[command(name = "starline-ip")]
#[command(about = "Interview Pipeline microservice for Starline")]
#[command(version)]
struct Args {
    /// Root folder holding the database (overrides ENV and TOML)
    #[arg(short, long, env = "STARLINE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "STARLINE_IP_PORT")]
    port: Option<u16>,

    /// TOML config file (default: ~/.config/starline/starline-ip.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the default log level
    let toml_config = TomlConfig::load_or_default(args.config.as_deref(), MODULE_NAME)
        .context("Failed to load TOML config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("starline_ip={0},starline_common={0},tower_http=info", toml_config.logging.level)
                    .into()
            }),
        )
        .init();

    // Build identification immediately after tracing init
    info!(
        "Starting Starline Interview Pipeline (starline-ip) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Root folder: CLI → ENV → TOML → compiled default
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = match init_database(&db_path).await {
        Ok(pool) => {
            info!("Database connection established");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let settings = PipelineSettings::load(&db_pool, &toml_config)
        .await
        .context("Failed to load pipeline settings")?;
    info!(
        evaluator_timeout_ms = settings.evaluator_timeout.as_millis() as u64,
        max_lock_wait_ms = settings.max_lock_wait_ms,
        min_answer_chars = settings.answer_limits.min_chars,
        max_answer_chars = settings.answer_limits.max_chars,
        "Pipeline settings loaded"
    );

    let evaluator = build_evaluator(&toml_config);

    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    let shutdown = CancellationToken::new();
    let state = AppState::new(db_pool, event_bus, evaluator, settings, shutdown.clone());
    let app = build_router(state);

    let port = args
        .port
        .or(toml_config.port)
        .unwrap_or(starline_common::config::CompiledDefaults::for_current_platform().port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown: wait for Ctrl+C / SIGTERM, then cancel in-flight work
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
