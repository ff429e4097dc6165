//! Lamad Progress Daemon
//!
//! Serves lesson progression, quiz scoring, certification and the SCORM
//! runtime bridge over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (reads <storage-dir>/config.toml when present)
//! lamad-progress
//!
//! # Start with custom config
//! lamad-progress --config /path/to/config.toml
//!
//! # Custom storage directory and port
//! lamad-progress --storage-dir /data/lamad --http-port 8096
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lamad_progress::config::default_storage_dir;
use lamad_progress::scorm::spawn_sweeper;
use lamad_progress::services::events::spawn_logging_listener;
use lamad_progress::{Config, HttpServer, Services};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lamad-progress")]
#[command(about = "Lesson progression, certification and SCORM runtime sidecar")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "LAMAD_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory for the database and extracted packages
    #[arg(long, env = "LAMAD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "LAMAD_HTTP_PORT")]
    http_port: Option<u16>,

    /// Quiz pass threshold (percent) when neither quiz nor course sets one
    #[arg(long, env = "LAMAD_DEFAULT_PASS_THRESHOLD", value_parser = clap::value_parser!(u8).range(0..=100))]
    default_pass_threshold: Option<u8>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lamad_progress=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Without --config, the config.toml written on an earlier start is honoured
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let dir = args.storage_dir.clone().unwrap_or_else(default_storage_dir);
            Config::load_from_dir(&dir)
                .with_context(|| format!("failed to load config from {}", dir.display()))?
        }
    };

    // CLI overrides the file
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(threshold) = args.default_pass_threshold {
        config.default_pass_threshold = threshold;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        attempt_policy = ?config.quiz_attempt_policy,
        "Starting lamad-progress"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let services = Arc::new(Services::open(config).context("failed to open progress store")?);
    let _listener = spawn_logging_listener(services.events.clone());

    // Sweep package directories left behind by an earlier run
    let packages = services.packages.clone();
    tokio::spawn(async move {
        match packages.garbage_collect().await {
            Ok(report) if !report.removed.is_empty() || !report.failed.is_empty() => {
                info!(removed = report.removed.len(), failed = report.failed.len(), "Startup package sweep");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Startup package sweep failed"),
        }
    });

    let http_server = Arc::new(HttpServer::new(services.clone(), http_addr));
    let _sweeper = spawn_sweeper(http_server.sessions().clone(), &services.config);
    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.clone().run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    let open_sessions = http_server.sessions().len();
    if open_sessions > 0 {
        warn!(sessions = open_sessions, "Exiting with open SCORM sessions");
    }

    if let Ok(stats) = services.db.stats() {
        info!(
            courses = stats.course_count,
            progress_records = stats.progress_count,
            certificates = stats.certificate_count,
            "Final store stats"
        );
    }

    Ok(())
}
