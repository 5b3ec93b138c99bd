//! LiteBill Worker - billing ingestion and invoice generation backend
//!
//! This worker connects to NATS and handles messages from the web frontend.

mod auth;
mod cli;
mod config;
mod defaults;
mod db;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Minting a token needs only the secret; keep stdout clean for the token
    if let Some(Command::IssueToken { user, tenant, role, hours }) = &cli.command {
        dotenvy::dotenv().ok();
        let secret = config::jwt_secret(|key| std::env::var(key).ok())?;
        println!("{}", auth::generate_token(*user, role, *tenant, *hours, &secret)?);
        return Ok(());
    }

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,litebill_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    info!("Starting LiteBill Worker...");

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    if matches!(cli.command, Some(Command::Migrate)) {
        info!("Migrations applied, exiting");
        return Ok(());
    }

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (&config.nats_user, &config.nats_password) {
        (Some(user), Some(password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone())
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let archives = services::archive_store::NatsArchiveStore::open(
        &nats_client,
        &config.archive_bucket,
        config.archive_retention,
    )
    .await?;

    let state = Arc::new(handlers::AppState::new(pool, &config, Arc::new(archives))?);
    info!(
        "Bulk export: {} render contexts, zip level {}, {:?} per page",
        state.bulk_options.concurrency, state.bulk_options.compression_level, config.render_timeout
    );

    let handler_result = handlers::start_handlers(nats_client, state).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}
