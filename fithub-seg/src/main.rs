//! fithub-seg - Customer segmentation service
//!
//! Loads configuration, opens the shared database, starts the daily
//! segmentation schedule and serves the admin segmentation API.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fithub_common::config::{
    database_path, load_toml_config, locate_config_file, resolve_root_folder, ROOT_FOLDER_ENV,
};
use fithub_common::db::init_database_pool;
use fithub_seg::config::{ServiceConfig, CONFIG_ENV, CONFIG_FILE_NAME};
use fithub_seg::models::RunTrigger;
use fithub_seg::services::Scheduler;
use fithub_seg::{build_router, AppState};

/// Command-line arguments for fithub-seg
#[derive(Parser, Debug)]
#[command(name = "fithub-seg")]
#[command(about = "RFM customer segmentation service for FitHub")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "FITHUB_SEG_PORT")]
    port: Option<u16>,

    /// Folder containing fithub.db
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one segmentation pass, print the report as JSON and exit
    #[arg(long)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref(), CONFIG_ENV, CONFIG_FILE_NAME);
    let config: ServiceConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting FitHub Segmentation (fithub-seg) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using built-in defaults"),
    }

    config.validate().context("Invalid configuration")?;

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    let db_path = database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::new(pool.clone(), &config.segmentation);

    if args.run_once {
        let report = state
            .runner
            .trigger(RunTrigger::Cli)
            .await
            .context("Segmentation run failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        pool.close().await;
        return Ok(());
    }

    let schedule = Scheduler::spawn(state.runner.clone(), config.schedule.clone());

    let app = build_router(state);
    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("fithub-seg listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = schedule {
        handle.abort();
    }
    pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
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
}
