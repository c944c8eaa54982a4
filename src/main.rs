//! # stagehand
//!
//! Installer service binary. Wires settings, logging, the profile store and
//! the operation handlers into a JSON-RPC router and serves it.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stagehand_operate::{CopyInstaller, Orchestrator};
use stagehand_rpc::api::HttpApiClientFactory;
use stagehand_rpc::server::{serve_stdio, serve_tcp};
use stagehand_rpc::{FileStoreOpener, RouterBuilder, ServiceContext};
use stagehand_settings::{StagehandSettings, TransportKind};
use stagehand_store::Database;
use stagehand_telemetry::{TelemetryConfig, init_telemetry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Stagehand installer service.
#[derive(Parser, Debug)]
#[command(name = "stagehand", version, about = "Stagehand installer service")]
struct Cli {
    /// Settings file (defaults to `~/.stagehand/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Serve newline-delimited JSON-RPC over TCP instead of stdio.
    #[arg(long)]
    tcp: bool,

    /// Bind address for the TCP transport.
    #[arg(long)]
    listen: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut StagehandSettings) {
        if let Some(path) = &self.db_path {
            settings.store.db_path = path.display().to_string();
        }
        if let Some(addr) = &self.listen {
            settings.server.listen_addr.clone_from(addr);
            settings.server.transport = TransportKind::Tcp;
        }
        if self.tcp {
            settings.server.transport = TransportKind::Tcp;
        }
    }
}

fn db_path(settings: &StagehandSettings) -> PathBuf {
    if settings.store.db_path.is_empty() {
        stagehand_settings::stagehand_dir()
            .join("database")
            .join("stagehand.db")
    } else {
        PathBuf::from(&settings.store.db_path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => stagehand_settings::load_settings_from_path(path),
        None => stagehand_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);

    let _ = init_telemetry(&TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));

    // Fail at startup on an unusable database path.
    let db_path = db_path(&settings);
    Database::open(&db_path)
        .and_then(|db| db.close())
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let api = HttpApiClientFactory::new(
        &settings.api.base_url,
        &settings.api.user_agent,
        Duration::from_millis(settings.api.connect_timeout_ms),
    )
    .context("failed to build API client")?;

    let services = ServiceContext {
        version: env!("CARGO_PKG_VERSION").to_string(),
        api: Arc::new(api),
        store: Arc::new(FileStoreOpener::new(&db_path)),
        progress_interval: Duration::from_millis(settings.progress.notify_interval_ms),
    };

    let mut builder = RouterBuilder::new();
    stagehand_rpc::builtin::register(&mut builder);
    stagehand_operate::handlers::register(
        &mut builder,
        Arc::new(Orchestrator::new(Arc::new(CopyInstaller))),
    );
    let router = Arc::new(builder.build(services));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        methods = ?router.methods(),
        db = %db_path.display(),
        "stagehand starting"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let _signal = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutting down");
        signal_token.cancel();
    });

    let queue = settings.server.outbound_queue;
    match settings.server.transport {
        TransportKind::Stdio => serve_stdio(router, &shutdown, queue).await?,
        TransportKind::Tcp => {
            let listener = TcpListener::bind(settings.server.listen_addr.as_str())
                .await
                .with_context(|| format!("failed to bind {}", settings.server.listen_addr))?;
            serve_tcp(router, listener, &shutdown, queue).await?;
        }
    }

    info!("stagehand stopped");
    Ok(())
}
