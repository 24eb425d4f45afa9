//! content-registry
//!
//! ```text
//!  config.toml ──▶ loader + validation ──▶ Controller::run
//!                                            │
//!            ┌───────────────────────────────┼──────────────────────────┐
//!            ▼                               ▼                          ▼
//!     security policy               storage topology           background tasks
//!     (rustls, client CA)           (default + sub-paths)      (GC, extensions, sync)
//!            │                               │
//!            └──────────────▶ router + listener (axum-server) ◀── LiveConfig
//!                                                                   ▲
//!  watcher / SIGHUP ──▶ Controller::load_new_config ────────────────┘
//!  SIGINT / SIGTERM ──▶ Controller::shutdown (tasks first, then drain)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use content_registry::config::load_config;
use content_registry::config::watcher::ConfigWatcher;
use content_registry::lifecycle::signals::{shutdown_signal, spawn_reload_on_sighup};
use content_registry::observability::logging::init_logging;
use content_registry::{linked_extensions, Controller};

#[derive(Parser)]
#[command(name = "content-registry")]
#[command(about = "Content registry server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry with the given configuration file
    Serve { config: PathBuf },
    /// Validate a configuration file and print it with secrets removed
    Verify { config: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { config } => {
            let config = load_config(&config)?;
            println!("{}", toml::to_string_pretty(&config.sanitized())?);
            Ok(())
        }
        Commands::Serve { config: path } => serve(path).await,
    }
}

async fn serve(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path)?;
    init_logging(&config.log)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "content-registry starting");

    let controller = Arc::new(Controller::new(config, linked_extensions()));

    // Hot reload: file watcher and SIGHUP feed the same channel
    let (watcher, mut updates) = ConfigWatcher::new(&path);
    spawn_reload_on_sighup(path.clone(), watcher.sender());
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "config file watcher unavailable");
            None
        }
    };

    let reloader = controller.clone();
    tokio::spawn(async move {
        while let Some(new_config) = updates.recv().await {
            if let Err(e) = reloader.load_new_config(&new_config) {
                tracing::warn!(error = %e, "configuration reload skipped");
            }
        }
    });

    let stopper = controller.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.shutdown().await;
    });

    controller.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
