//! `ternd` — the tern labeler daemon.
//!
//! Binary entrypoint that wires the label log, the signing key, and the
//! HTTP surface into a running ATProto labeler.
//!
//! # Usage
//!
//! ```text
//! ternd start -c tern.toml               # start the labeler
//! ternd start -l 127.0.0.1:8081          # override the listen address
//! ternd start --admin-addr 127.0.0.1:8082
//! ternd status -c tern.toml              # inspect the local log
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tern_codec::LabelSigner;
use tern_engine::{Labeler, migrate_legacy};
use tern_server::LabelerServer;
use tern_store::LogStore;
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ternd", version, about = "ATProto labeler daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the labeler.
    Start {
        /// Override the XRPC listen address (e.g. "127.0.0.1:8081").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Override the admin listen address. The admin API has no
        /// authentication; keep it off public interfaces.
        #[arg(long)]
        admin_addr: Option<String>,

        /// Override the storage directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Show the state of the local label log.
    Status,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start {
            listen_addr,
            admin_addr,
            data_dir,
        } => {
            // CLI args override config file values.
            if let Some(addr) = listen_addr {
                config.server.listen_addr = addr;
            }
            if let Some(addr) = admin_addr {
                config.server.admin_listen_addr = Some(addr);
            }
            if let Some(dir) = data_dir {
                config.storage.path = dir;
            }
            cmd_start(config).await
        }
        Commands::Status => cmd_status(&config),
    }
}

// -----------------------------------------------------------------------
// ternd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting ternd");

    anyhow::ensure!(!config.labeler.did.is_empty(), "no labeler DID configured");
    let signer = LabelSigner::from_hex(&config.labeler.private_key)
        .context("parsing the configured private key")?;
    info!(
        did = %config.labeler.did,
        public_key = %signer.did_key(),
        "labeler identity"
    );

    // --- Label log ---
    std::fs::create_dir_all(&config.storage.path).context("failed to create data directory")?;
    let store =
        Arc::new(LogStore::open(&config.storage.path).context("failed to open the label log")?);
    info!(
        path = %config.storage.path.display(),
        highest_seq = store.max_seq().unwrap_or(0),
        "label log open"
    );

    // --- Legacy migration ---
    // Runs before the service takes traffic, so subscribers never observe
    // a partially imported log.
    if let Some(legacy_path) = &config.storage.legacy_path {
        if legacy_path.exists() {
            let imported = migrate_legacy(&store, legacy_path)
                .context("importing the legacy label database")?;
            if imported > 0 {
                info!(count = imported, "migrated entries from the legacy database");
            }
        } else {
            warn!(path = %legacy_path.display(), "configured legacy database does not exist");
        }
    }

    // --- Engine ---
    let labeler = Arc::new(Labeler::new(store, signer, config.labeler.did.clone()));
    if let Some(values) = &config.labeler.allowed_values {
        labeler.set_allowed_labels(values);
        info!(count = values.len(), "label value allow-list active");
    }

    // --- Admin API (label ingress + metrics) ---
    if let Some(admin_addr) = &config.server.admin_listen_addr {
        let router = LabelerServer::admin_router(Arc::clone(&labeler));
        let listener = tokio::net::TcpListener::bind(admin_addr)
            .await
            .context("failed to bind the admin address")?;
        info!(addr = %admin_addr, "admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!(err = %e, "admin server exited");
            }
        });
    }

    // --- Public XRPC API ---
    let server = LabelerServer::new(labeler);
    info!(addr = %config.server.listen_addr, "XRPC API ready");
    server
        .serve_with_shutdown(&config.server.listen_addr, shutdown_signal())
        .await
        .context("XRPC server failed")?;

    info!("shutdown complete");
    Ok(())
}

// -----------------------------------------------------------------------
// ternd status
// -----------------------------------------------------------------------

fn cmd_status(config: &CliConfig) -> Result<()> {
    let store = LogStore::open(&config.storage.path).map_err(|e| {
        anyhow::anyhow!(
            "cannot open the label log at {} ({e})",
            config.storage.path.display(),
        )
    })?;

    let highest = store.max_seq()?;
    let count = store.count_from(1)?;
    println!("Label log: {}", config.storage.path.display());
    println!("  entries:     {count}");
    println!("  highest seq: {highest}");
    Ok(())
}

// -----------------------------------------------------------------------
// Signal handling
// -----------------------------------------------------------------------

/// Wait for a SIGTERM or SIGINT (Ctrl-C) signal.
///
/// On the first signal, the returned future resolves and initiates
/// graceful shutdown. If a second signal arrives while shutdown is in
/// progress, the process exits immediately.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT (Ctrl-C), initiating graceful shutdown"),
        () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }

    tokio::spawn(async {
        let second = async {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to install second SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
        };
        second.await;
        warn!("received second signal during shutdown — forcing exit");
        std::process::exit(1);
    });
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
