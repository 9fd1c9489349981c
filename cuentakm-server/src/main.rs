//! cuentakm - weekly odometer reading service
//!
//! Startup sequence:
//! 1. tracing, then build identification
//! 2. configuration (CLI → environment → TOML → defaults)
//! 3. database open/create, agent seed
//! 4. extraction client, mail notifier, submission engine
//! 5. HTTP server

use anyhow::{Context, Result};
use clap::Parser;
use cuentakm_common::config::{AppConfig, ConfigOverrides};
use cuentakm_common::time::SystemClock;
use cuentakm_server::services::{
    LogOnlyNotifier, MailApiNotifier, NotificationDispatcher, Notifier, PhotoStore,
    SubmissionEngine, VisionApiExtractor,
};
use cuentakm_server::{build_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Command-line arguments for cuentakm
#[derive(Parser, Debug)]
#[command(name = "cuentakm")]
#[command(about = "Weekly odometer reading service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CUENTAKM_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for database, media and static assets
    #[arg(short, long, env = "CUENTAKM_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CUENTAKM_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long, env = "CUENTAKM_BIND")]
    bind: Option<String>,
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    let mail = &config.notifications;
    match (&mail.api_key, mail.enabled) {
        (Some(api_key), true) => {
            let notifier = MailApiNotifier::new(mail, api_key.clone())
                .context("Failed to create mail client")?;
            info!("Mail notifications enabled via {}", mail.endpoint);
            Ok(Arc::new(notifier))
        }
        (None, true) => {
            warn!("No mail API key configured; notifications will only be logged");
            Ok(Arc::new(LogOnlyNotifier))
        }
        (_, false) => {
            info!("Mail notifications disabled by configuration");
            Ok(Arc::new(LogOnlyNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        config_path: args.config,
        root_folder: args.root_folder,
        bind_address: args.bind,
        port: args.port,
    };

    // Subscriber first: config resolution logs
    let level = AppConfig::peek_log_level(&overrides).unwrap_or_else(|| "info".to_string());
    init_tracing(&level);

    info!(
        "Starting cuentakm v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = AppConfig::resolve(&overrides).context("Failed to load configuration")?;
    info!("Root folder: {}", config.root_folder.display());
    info!("Database path: {}", config.database_path.display());

    let pool = cuentakm_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    cuentakm_server::db::agents::seed_agents(&pool, &config.agents).await?;

    if config.extraction.api_key.is_none() {
        warn!("No vision API key configured; every submission will fail extraction");
    }
    let extractor = VisionApiExtractor::new(&config.extraction)
        .context("Failed to create vision client")?;

    let photos = PhotoStore::new(config.media_root.clone());
    let dispatcher = NotificationDispatcher::new(
        build_notifier(&config)?,
        photos.clone(),
        config.notifications.week_close_recipients.clone(),
        config.notifications.mismatch_recipients.clone(),
    );
    let engine = SubmissionEngine::new(
        pool.clone(),
        photos,
        Arc::new(extractor),
        dispatcher,
        Arc::new(SystemClock),
    );
    let discarded = engine.discard_incomplete().await?;
    if discarded > 0 {
        warn!("Removed {} reading(s) left without a value", discarded);
    }

    let mut state = AppState::new(pool, Arc::new(engine), config.static_dir.clone())
        .with_upload_limit(config.max_upload_bytes);
    if config.serve_media {
        info!("Development mode: serving media from {}", config.media_root.display());
        state = state.with_media(config.media_root.clone());
    }
    let app = build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("cuentakm listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
